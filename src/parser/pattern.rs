// parser/pattern.rs

//! A regular-expression extractor for line formats the fixed-width heuristic can't handle.

use regex::Regex;

use crate::LogEvent;

use super::Extractor;

/// The capture group names [`Pattern`] maps onto [`LogEvent`] fields.
pub const GROUP_NAMES: [&str; 3] = ["timestamp", "level", "message"];

/// Possible error situations when compiling a [`Pattern`].
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    /// The pattern is not a valid regular expression.
    #[error("invalid pattern: {0}")]
    Invalid(#[from] regex::Error),

    /// The pattern has none of the named groups in [`GROUP_NAMES`].
    #[error("pattern must contain at least one of the named groups `timestamp`, `level` or `message`, e.g. (?P<message>.*)")]
    NoGroups,
}

/// Extracts events using a regular expression with named capture groups.
///
/// The groups `timestamp`, `level` and `message` fill the corresponding [`LogEvent`] fields. A
/// group that is absent from the pattern, or that doesn't participate in a match, leaves its
/// field empty. Lines the pattern doesn't match yield no event.
#[derive(Clone, Debug)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] if `pattern` is invalid or captures none of [`GROUP_NAMES`].
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(pattern)?;

        let has_group = regex
            .capture_names()
            .flatten()
            .any(|name| GROUP_NAMES.contains(&name));
        if !has_group {
            return Err(PatternError::NoGroups);
        }

        Ok(Self { regex })
    }
}

impl Extractor for Pattern {
    fn extract(&self, line: &str) -> Option<LogEvent> {
        let captures = self.regex.captures(line)?;
        let group = |name| captures.name(name).map_or("", |m| m.as_str());

        Some(LogEvent::new(
            group("timestamp"),
            group("level"),
            group("message"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::Extractor;
    use crate::LogEvent;

    use super::{Pattern, PatternError};

    #[test]
    fn extracts_named_groups() {
        let pattern = Pattern::new(
            r"^(?P<level>[A-Z]+) (?P<timestamp>\d{4}-\d{2}-\d{2}T\S+) (?P<message>.*)$",
        )
        .unwrap();

        assert_eq!(
            pattern.extract("ERROR 2023-10-25T12:34:56Z connection reset"),
            Some(LogEvent::new(
                "2023-10-25T12:34:56Z",
                "ERROR",
                "connection reset"
            ))
        );
    }

    #[test]
    fn missing_groups_are_empty() {
        let pattern = Pattern::new(r"^msg=(?P<message>.*)$").unwrap();

        assert_eq!(
            pattern.extract("msg=hi there"),
            Some(LogEvent::new("", "", "hi there"))
        );
    }

    #[test]
    fn non_matching_lines_yield_nothing() {
        let pattern = Pattern::new(r"^msg=(?P<message>.*)$").unwrap();

        assert_eq!(pattern.extract("something else"), None);
    }

    #[test]
    fn rejects_invalid_pattern() {
        assert!(matches!(
            Pattern::new("(?P<message>"),
            Err(PatternError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_pattern_without_groups() {
        assert!(matches!(
            Pattern::new(r"^(?P<other>.*)$"),
            Err(PatternError::NoGroups)
        ));
    }
}
