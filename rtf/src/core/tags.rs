//! Tag header parsing for group and test scripts.
//!
//! A script's leading comment block may carry metadata lines of the form
//! `# KEY: value`:
//!
//! ```text
//! #!/bin/sh
//! # SUMMARY: Check that the network comes up
//! # LABELS: linux, !slow
//! # AUTHOR: Jane Doe <jane@example.com>
//! # REPEAT: 3
//! ```
//!
//! Parsing stops at the first line that is neither blank nor a comment.

use tracing::warn;

use crate::error::TagError;

/// Metadata parsed from a script header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub summary: String,
    /// Space-joined when given more than once.
    pub author: String,
    /// Raw comma separated label list; see [`crate::core::labels::parse_labels`].
    pub labels: String,
    pub repeat: Option<u32>,
    /// Space-joined when given more than once.
    pub issue: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagField {
    Summary,
    Author,
    Labels,
    Repeat,
    Issue,
}

/// Recognised keys. Unknown keys are ignored.
const TAG_FIELDS: &[(&str, TagField)] = &[
    ("SUMMARY", TagField::Summary),
    ("AUTHOR", TagField::Author),
    ("LABELS", TagField::Labels),
    ("REPEAT", TagField::Repeat),
    ("ISSUE", TagField::Issue),
];

impl TagField {
    fn lookup(key: &str) -> Option<Self> {
        TAG_FIELDS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, field)| *field)
    }

    fn key(self) -> &'static str {
        TAG_FIELDS
            .iter()
            .find(|(_, field)| *field == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN")
    }

    fn allows_multiple(self) -> bool {
        matches!(self, TagField::Author | TagField::Issue)
    }
}

impl Tags {
    fn apply(
        &mut self,
        field: TagField,
        value: &str,
        seen: &mut Vec<TagField>,
    ) -> Result<(), TagError> {
        if !field.allows_multiple() {
            if seen.contains(&field) {
                return Err(TagError::Duplicate { field: field.key() });
            }
            seen.push(field);
        }
        match field {
            TagField::Summary => self.summary = value.to_string(),
            TagField::Labels => self.labels = value.to_string(),
            TagField::Author => append_spaced(&mut self.author, value),
            TagField::Issue => append_spaced(&mut self.issue, value),
            TagField::Repeat => match value.parse::<u32>() {
                Ok(repeat) => self.repeat = Some(repeat),
                Err(err) => warn!(value, err = %err, "ignoring non-integer REPEAT tag"),
            },
        }
        Ok(())
    }
}

fn append_spaced(target: &mut String, value: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(value);
}

/// Parse the tag header of a script's contents.
pub fn parse_tags(contents: &str) -> Result<Tags, TagError> {
    let mut tags = Tags::default();
    let mut seen = Vec::new();

    for line in contents.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with('#') {
            break;
        }
        let Some(rest) = trimmed.strip_prefix("# ") else {
            continue;
        };
        let Some((key, value)) = rest.split_once(':') else {
            continue;
        };
        if let Some(field) = TagField::lookup(key) {
            tags.apply(field, value.trim(), &mut seen)?;
        }
    }

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "#!/bin/sh
# SUMMARY: A Test
# ISSUE: https://example.com/issues/1
# AUTHOR: Dave Tucker <dt@docker.com>
# AUTHOR: Rolf Neugebauer <rofl.neugebauer@docker.com>
# LABELS: foo, bar, !baz
# REPEAT: 5
# NAME: ignored

set -e
# SUMMARY: not part of the header
exit 0
";

    #[test]
    fn parses_header_fields() {
        let tags = parse_tags(GOOD).expect("parse");
        assert_eq!(tags.summary, "A Test");
        assert_eq!(
            tags.author,
            "Dave Tucker <dt@docker.com> Rolf Neugebauer <rofl.neugebauer@docker.com>"
        );
        assert_eq!(tags.labels, "foo, bar, !baz");
        assert_eq!(tags.repeat, Some(5));
        assert_eq!(tags.issue, "https://example.com/issues/1");
    }

    #[test]
    fn duplicated_single_value_field_is_an_error() {
        let contents = "#!/bin/sh\n# LABELS: foo\n# LABELS: bar\n";
        let err = parse_tags(contents).unwrap_err();
        assert_eq!(err, TagError::Duplicate { field: "LABELS" });
        assert_eq!(err.to_string(), "field LABELS specified multiple times");
    }

    #[test]
    fn duplicated_repeat_is_an_error() {
        let contents = "# REPEAT: 1\n# REPEAT: 2\n";
        assert_eq!(
            parse_tags(contents).unwrap_err(),
            TagError::Duplicate { field: "REPEAT" }
        );
    }

    #[test]
    fn invalid_repeat_is_ignored() {
        let tags = parse_tags("# REPEAT: many\n").expect("parse");
        assert_eq!(tags.repeat, None);
    }

    #[test]
    fn empty_script_yields_default_tags() {
        assert_eq!(parse_tags("").expect("parse"), Tags::default());
    }
}
