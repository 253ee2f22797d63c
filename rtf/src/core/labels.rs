//! Label algebra: deciding whether a labelled node runs on this host.
//!
//! A node carries a positive set `L` and a negative set `NL`; the host
//! supplies `H` and `HN`. See [`check_label`] for the rules.

use std::collections::HashSet;

use crate::error::ConfigError;

/// Unordered set of labels.
pub type LabelSet = HashSet<String>;

/// Split a comma separated label list into `(positive, negative)` sets.
///
/// Items prefixed with `!` are negative. Items are trimmed and empty items are
/// dropped, so `"foo, !bar,,baz"` yields `{foo, baz}` and `{bar}`.
pub fn parse_labels(labels: &str) -> (LabelSet, LabelSet) {
    let mut set = LabelSet::new();
    let mut unset = LabelSet::new();
    for item in labels.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        match item.strip_prefix('!') {
            Some(negated) => {
                let negated = negated.trim();
                if !negated.is_empty() {
                    unset.insert(negated.to_string());
                }
            }
            None => {
                set.insert(item.to_string());
            }
        }
    }
    (set, unset)
}

/// Decide whether a node with `labels`/`not_labels` runs on a host with
/// `host_labels`/`host_not_labels`.
///
/// - A non-empty `labels` needs at least one label in `host_labels`.
/// - Any of `not_labels` present in `host_labels` excludes the node.
/// - Any of `labels` present in `host_not_labels` excludes the node.
pub fn check_label(
    labels: &LabelSet,
    not_labels: &LabelSet,
    host_labels: &LabelSet,
    host_not_labels: &LabelSet,
) -> bool {
    if !labels.is_empty() && labels.is_disjoint(host_labels) {
        return false;
    }
    if !not_labels.is_disjoint(host_labels) {
        return false;
    }
    labels.is_disjoint(host_not_labels)
}

/// Name-pattern filter.
///
/// An empty pattern matches everything. Otherwise `name` must start with
/// `pattern`; groups also match when their own name is a prefix of the
/// pattern, so the path down to a deep leaf stays traversable.
pub fn matches_pattern(name: &str, pattern: &str, is_group: bool) -> bool {
    pattern.is_empty() || name.starts_with(pattern) || (is_group && pattern.starts_with(name))
}

/// Render both sets as one deterministic string joined by `sep`.
///
/// Negative labels come first with a `!` prefix; each half is sorted.
pub fn label_string(labels: &LabelSet, not_labels: &LabelSet, sep: &str) -> String {
    let mut negative: Vec<&str> = not_labels.iter().map(String::as_str).collect();
    negative.sort_unstable();
    let mut positive: Vec<&str> = labels.iter().map(String::as_str).collect();
    positive.sort_unstable();

    negative
        .into_iter()
        .map(|label| format!("!{label}"))
        .chain(positive.into_iter().map(str::to_string))
        .collect::<Vec<_>>()
        .join(sep)
}

/// The single optional test pattern from positional arguments.
pub fn single_pattern(args: &[String]) -> Result<&str, ConfigError> {
    match args {
        [] => Ok(""),
        [pattern] => Ok(pattern.as_str()),
        _ => Err(ConfigError::TooManyPatterns),
    }
}

/// Join two comma separated label lists, skipping empty ones.
pub fn join_label_lists(first: &str, second: &str) -> String {
    [first, second]
        .into_iter()
        .map(str::trim)
        .filter(|list| !list.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Union `extra` into `target`.
pub fn merge_into(target: &mut LabelSet, extra: &LabelSet) {
    target.extend(extra.iter().cloned());
}
