//! Deterministic partitioning of the runnable test list.

use crate::error::ConfigError;

/// Return `(start, count)` of shard `shard` (1-based) out of `total_shards`
/// over a sequence of `size` items.
///
/// The first `size % total_shards` shards get one extra item, so the shards
/// cover the sequence exactly once. Shards past the end are empty.
pub fn calculate_shard(size: usize, shard: usize, total_shards: usize) -> (usize, usize) {
    if total_shards == 0 || shard == 0 {
        return (0, size);
    }
    let base = size / total_shards;
    let remainder = size % total_shards;
    let index = shard - 1;
    let start = index * base + remainder.min(index);
    let count = if index < remainder { base + 1 } else { base };
    (start.min(size), count)
}

/// Parse an `N/M` shard pattern. An empty pattern means "not sharded" and
/// returns `None`.
pub fn parse_shard_pattern(pattern: &str) -> Result<Option<(usize, usize)>, ConfigError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    let invalid = || ConfigError::InvalidShard(pattern.to_string());
    let (shard, total) = pattern.split_once('/').ok_or_else(invalid)?;
    let shard: usize = shard.trim().parse().map_err(|_| invalid())?;
    let total: usize = total.trim().parse().map_err(|_| invalid())?;
    if shard < 1 || total < 1 || shard > total {
        return Err(invalid());
    }
    Ok(Some((shard, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_shard_ranges() {
        let cases = [
            (22, 1, 10, 0, 3),
            (22, 2, 10, 3, 3),
            (22, 3, 10, 6, 2),
            (29, 10, 10, 27, 2),
            (2, 1, 6, 0, 1),
            (2, 2, 6, 1, 1),
            (2, 3, 6, 2, 0),
            (2, 6, 6, 2, 0),
        ];
        for (size, shard, total, start, count) in cases {
            assert_eq!(
                calculate_shard(size, shard, total),
                (start, count),
                "size={size} shard={shard}/{total}"
            );
        }
    }

    #[test]
    fn shards_cover_sequence_without_gaps_or_overlap() {
        for size in 0..40 {
            for total in 1..15 {
                let mut next = 0;
                for shard in 1..=total {
                    let (start, count) = calculate_shard(size, shard, total);
                    assert_eq!(start, next, "size={size} shard={shard}/{total}");
                    next = start + count;
                }
                assert_eq!(next, size, "size={size} total={total}");
            }
        }
    }

    #[test]
    fn parses_valid_patterns() {
        assert_eq!(parse_shard_pattern(""), Ok(None));
        assert_eq!(parse_shard_pattern("1/10"), Ok(Some((1, 10))));
        assert_eq!(parse_shard_pattern("10/10"), Ok(Some((10, 10))));
    }

    #[test]
    fn rejects_invalid_patterns() {
        for pattern in ["1", "0/3", "4/3", "a/3", "1/b", "1/0", "1/2/3"] {
            assert_eq!(
                parse_shard_pattern(pattern),
                Err(ConfigError::InvalidShard(pattern.to_string())),
                "{pattern}"
            );
        }
    }
}
