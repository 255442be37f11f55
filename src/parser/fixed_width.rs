// parser/fixed_width.rs

//! The default extraction heuristic for lines like `2023-10-25 12:34:56 [INFO] message`.

use crate::LogEvent;

use super::Extractor;

/// The number of characters in the timestamp prefix.
pub const TIMESTAMP_WIDTH: usize = 19;

/// The shortest line that yields an event: the timestamp plus one separator character.
pub const MIN_LINE_WIDTH: usize = TIMESTAMP_WIDTH + 1;

/// Extracts events from lines with a fixed-width timestamp prefix and a bracketed level.
///
/// - `timestamp` is the first [`TIMESTAMP_WIDTH`] characters.
/// - `level` is the text between the first `[` after the separator and the next `]`.
/// - `message` is everything after that `]`.
///
/// If there is no `[`...`]` pair, `level` and `message` are both empty. Lines shorter than
/// [`MIN_LINE_WIDTH`] characters yield no event at all. Widths count characters, not bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedWidth;

impl Extractor for FixedWidth {
    fn extract(&self, line: &str) -> Option<LogEvent> {
        let mut chars = line.char_indices();
        let (timestamp_end, separator) = chars.nth(TIMESTAMP_WIDTH)?;
        let timestamp = &line[..timestamp_end];
        let rest = &line[timestamp_end + separator.len_utf8()..];

        let (level, message) = rest
            .find('[')
            .and_then(|open| {
                let after_open = &rest[open + 1..];
                let close = after_open.find(']')?;
                Some((&after_open[..close], &after_open[close + 1..]))
            })
            .unwrap_or(("", ""));

        Some(LogEvent::new(timestamp, level, message))
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::Extractor;
    use crate::LogEvent;

    use super::{FixedWidth, MIN_LINE_WIDTH};

    #[test]
    fn canonical_line() {
        assert_eq!(
            FixedWidth.extract("2023-10-25 12:34:56 [INFO] hello"),
            Some(LogEvent::new("2023-10-25 12:34:56", "INFO", " hello"))
        );
    }

    #[test]
    fn line_without_brackets() {
        assert_eq!(
            FixedWidth.extract("2023-10-25 12:34:56 plain message that is long"),
            Some(LogEvent::new("2023-10-25 12:34:56", "", ""))
        );
    }

    #[test]
    fn unclosed_bracket() {
        assert_eq!(
            FixedWidth.extract("2023-10-25 12:34:56 [INFO hello"),
            Some(LogEvent::new("2023-10-25 12:34:56", "", ""))
        );
    }

    #[test]
    fn closing_bracket_before_opening() {
        assert_eq!(
            FixedWidth.extract("2023-10-25 12:34:56 ] [ERROR] boom"),
            Some(LogEvent::new("2023-10-25 12:34:56", "ERROR", " boom"))
        );
    }

    #[test]
    fn only_first_bracket_pair_is_the_level() {
        assert_eq!(
            FixedWidth.extract("2023-10-25 12:34:56 [WARN] [db] slow query"),
            Some(LogEvent::new("2023-10-25 12:34:56", "WARN", " [db] slow query"))
        );
    }

    #[test]
    fn short_lines_yield_nothing() {
        assert_eq!(FixedWidth.extract(""), None);
        assert_eq!(FixedWidth.extract("too short"), None);
        assert_eq!(FixedWidth.extract("2023-10-25 12:34:56"), None);
    }

    #[test]
    fn minimum_width_line_yields_empty_event() {
        let line = "2023-10-25 12:34:56 ";
        assert_eq!(line.chars().count(), MIN_LINE_WIDTH);
        assert_eq!(
            FixedWidth.extract(line),
            Some(LogEvent::new("2023-10-25 12:34:56", "", ""))
        );
    }

    #[test]
    fn widths_count_characters() {
        // 19 two-byte characters followed by a separator.
        let timestamp = "é".repeat(19);
        let line = format!("{} [ÎNFO] héllo", timestamp);
        assert_eq!(
            FixedWidth.extract(&line),
            Some(LogEvent::new(timestamp, "ÎNFO", " héllo"))
        );
        assert_eq!(FixedWidth.extract(&"é".repeat(19)), None);
    }

    #[test]
    fn bracket_in_separator_position_is_skipped() {
        assert_eq!(
            FixedWidth.extract("2023-10-25 12:34:56[INFO] x"),
            Some(LogEvent::new("2023-10-25 12:34:56", "", ""))
        );
    }

    #[test]
    fn displayed_events_round_trip() {
        let event = LogEvent::new("2023-10-25 12:34:56", "DEBUG", " cache warm");
        assert_eq!(FixedWidth.extract(&event.to_string()), Some(event));
    }
}
