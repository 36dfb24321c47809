use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// A line that starts like a checkpoint number: a digit followed by digits or dots
static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9][.0-9]+").expect("valid regex"));

/// Sentinel used when a checkpoint carries no label
pub const NO_LABEL: &str = "-";

/// One checkpoint of the source project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Dotted revision number, e.g. `1.4.1.9`
    pub number: String,

    /// Committer display name, already transliterated
    pub author: String,

    /// Seconds since the Unix epoch
    pub timestamp: i64,

    /// Checkpoint label, or `-`
    pub label: String,

    /// Free text description including continuation lines
    pub description: String,
}

impl Checkpoint {
    pub fn has_label(&self) -> bool {
        self.label != NO_LABEL
    }

    /// Number of dot separated components
    pub fn depth(&self) -> usize {
        self.number.split('.').count()
    }

    /// Commit message written for this checkpoint
    pub fn message(&self) -> String {
        format!(
            "{}\n\nMKS Checkpoint Revision: {}\nMKS Checkpoint Description:\n\n{}\n",
            self.label, self.number, self.description
        )
    }

    /// Lightweight tag name: `number` or `number__label`, sanitized for git refs
    pub fn tag_name(&self) -> String {
        if self.has_label() {
            let label = sanitize_tag(&self.label);
            if label.is_empty() {
                sanitize_tag(&self.number)
            }
            else {
                format!("{}__{}", sanitize_tag(&self.number), label)
            }
        }
        else {
            sanitize_tag(&self.number)
        }
    }
}

/// How the history listing renders timestamps
#[derive(Debug, Clone)]
pub struct HistoryFormat {
    pub date_format: String,
    pub offset: FixedOffset,
}

impl HistoryFormat {
    fn parse_timestamp(&self, raw: &str) -> Option<i64> {
        let naive = NaiveDateTime::parse_from_str(raw.trim(), &self.date_format).ok()?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp())
    }
}

/// Parse a newest-first history listing into checkpoints, oldest first.
///
/// Lines that do not form a well-formed record are appended to the previous
/// record's description. In devpath mode a record with two or fewer number
/// components ends the listing; it and everything after it belong to the
/// mainline the devpath was created from.
pub fn parse_history(text: &str, format: &HistoryFormat, devpath: bool) -> Vec<Checkpoint> {
    let mut checkpoints: Vec<Checkpoint> = Vec::new();

    for raw_line in text.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        let record = if LEADING_NUMBER.is_match(line) {
            parse_record(line, format)
        }
        else {
            None
        };

        match record {
            Some(checkpoint) => {
                if devpath && checkpoint.depth() <= 2 {
                    debug!(revision = %checkpoint.number, "Devpath history reached the mainline, truncating");
                    break;
                }
                checkpoints.push(checkpoint);
            }
            None => {
                if line.is_empty() {
                    continue;
                }
                if let Some(previous) = checkpoints.last_mut() {
                    previous.description.push('\n');
                    previous.description.push_str(line);
                }
            }
        }
    }

    checkpoints.reverse();
    checkpoints
}

fn parse_record(line: &str, format: &HistoryFormat) -> Option<Checkpoint> {
    let columns: Vec<&str> = line.split('\t').collect();
    if columns.len() < 3 {
        return None;
    }

    let number = columns[0];
    if number.len() < 3
        || !number.contains('.')
        || !number.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
        return None;
    }

    let timestamp = format.parse_timestamp(columns[2])?;

    let label = match columns.get(5) {
        Some(label) if !label.is_empty() => label.to_string(),
        _ => NO_LABEL.to_string(),
    };

    Some(Checkpoint {
        number: number.to_string(),
        author: normalize_author(columns[1]),
        timestamp,
        label,
        description: columns.get(6).map(|d| d.to_string()).unwrap_or_default(),
    })
}

/// Transliterate German umlauts so committer names stay ASCII-safe
pub fn normalize_author(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for c in name.trim().chars() {
        match c {
            'ä' => result.push_str("ae"),
            'Ä' => result.push_str("Ae"),
            'ö' => result.push_str("oe"),
            'Ö' => result.push_str("Oe"),
            'ü' => result.push_str("ue"),
            'Ü' => result.push_str("Ue"),
            'ß' => result.push_str("ss"),
            '<' | '>' => {}
            other => result.push(other),
        }
    }
    result
}

/// Characters git refuses in ref names
const ILLEGAL_REF_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\', '|', '"', '<', '>', '{', '}', '@', '\''];

/// Substitutions applied after illegal characters are dropped
const REF_SUBSTITUTIONS: &[(char, &str)] = &[('_', "-"), (' ', "_"), ('/', "-")];

/// Turn a revision number or label into a legal tag name component
pub fn sanitize_tag(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());

    for c in raw.trim().chars() {
        if c.is_control() || ILLEGAL_REF_CHARS.contains(&c) {
            continue;
        }
        match REF_SUBSTITUTIONS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => result.push_str(to),
            None => result.push(c),
        }
    }

    while result.contains("..") {
        result = result.replace("..", ".");
    }

    let trimmed = result.trim_end_matches('.').trim_start_matches('.');
    let trimmed = trimmed.strip_suffix(".lock").unwrap_or(trimmed);
    trimmed.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> HistoryFormat {
        HistoryFormat {
            date_format: "%d.%m.%Y %H:%M:%S".to_string(),
            offset: FixedOffset::east_opt(3600).unwrap(),
        }
    }

    fn line(number: &str, label: &str, description: &str) -> String {
        format!("{}\tAlice\t01.01.2020 10:00:00\t\t\t{}\t{}", number, label, description)
    }

    #[test]
    fn test_parse_single_record() {
        let text = line("1.4", "Label", "Desc line 1");
        let checkpoints = parse_history(&text, &format(), false);

        assert_eq!(checkpoints.len(), 1);
        let cp = &checkpoints[0];
        assert_eq!(cp.number, "1.4");
        assert_eq!(cp.author, "Alice");
        assert_eq!(cp.label, "Label");
        assert_eq!(cp.description, "Desc line 1");
        // 10:00 at +0100 is 09:00 UTC
        assert_eq!(cp.timestamp, 1_577_869_200);
    }

    #[test]
    fn test_continuation_line_appends_to_description() {
        let text = format!("{}\nmore text", line("1.4", "Label", "Desc line 1"));
        let checkpoints = parse_history(&text, &format(), false);

        assert_eq!(checkpoints.len(), 1);
        assert!(checkpoints[0].description.contains("Desc line 1"));
        assert!(checkpoints[0].description.contains("more text"));
    }

    #[test]
    fn test_number_like_line_failing_strict_check_is_continuation() {
        let text = format!(
            "{}\n2020 was a good year\n12\tonly\tthree\n1.5 without tabs",
            line("1.4", "", "first")
        );
        let checkpoints = parse_history(&text, &format(), false);

        assert_eq!(checkpoints.len(), 1);
        let description = &checkpoints[0].description;
        assert!(description.contains("2020 was a good year"));
        assert!(description.contains("12\tonly\tthree"));
        assert!(description.contains("1.5 without tabs"));
    }

    #[test]
    fn test_unparseable_date_is_continuation() {
        let text = format!("{}\n1.9\tBob\tyesterday\t\t\t\tnote", line("1.4", "", "first"));
        let checkpoints = parse_history(&text, &format(), false);
        assert_eq!(checkpoints.len(), 1);
        assert!(checkpoints[0].description.contains("yesterday"));
    }

    #[test]
    fn test_leading_continuation_without_record_is_discarded() {
        let text = format!("orphan text\n{}", line("1.2", "", "desc"));
        let checkpoints = parse_history(&text, &format(), false);
        assert_eq!(checkpoints.len(), 1);
        assert!(!checkpoints[0].description.contains("orphan"));
    }

    #[test]
    fn test_output_is_oldest_first() {
        let text = [line("1.3", "", "c"), line("1.2", "", "b"), line("1.1", "", "a")].join("\n");
        let numbers: Vec<String> = parse_history(&text, &format(), false)
            .into_iter()
            .map(|c| c.number)
            .collect();
        assert_eq!(numbers, vec!["1.1", "1.2", "1.3"]);
    }

    #[test]
    fn test_devpath_history_truncates_at_mainline_record() {
        let text = [
            line("1.4.1.3", "", "c"),
            line("1.4.1.2", "", "b"),
            line("1.4", "", "mainline"),
            line("1.3", "", "older mainline"),
        ]
        .join("\n");
        let numbers: Vec<String> = parse_history(&text, &format(), true)
            .into_iter()
            .map(|c| c.number)
            .collect();
        assert_eq!(numbers, vec!["1.4.1.2", "1.4.1.3"]);
    }

    #[test]
    fn test_mainline_history_keeps_short_numbers() {
        let text = [line("1.2", "", "b"), line("1.1", "", "a")].join("\n");
        assert_eq!(parse_history(&text, &format(), false).len(), 2);
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = format!("{}\r\nsecond line\r\n", line("1.4", "", "first"));
        let checkpoints = parse_history(&text, &format(), false);
        assert_eq!(checkpoints[0].description, "first\nsecond line");
    }

    #[test]
    fn test_missing_label_uses_sentinel() {
        let checkpoints = parse_history(&line("1.7", "", "d"), &format(), false);
        assert_eq!(checkpoints[0].label, NO_LABEL);
        assert!(!checkpoints[0].has_label());
        assert_eq!(checkpoints[0].tag_name(), "1.7");
    }

    #[test]
    fn test_message_layout() {
        let checkpoints = parse_history(&line("1.7", "Release", "Fixes"), &format(), false);
        assert_eq!(
            checkpoints[0].message(),
            "Release\n\nMKS Checkpoint Revision: 1.7\nMKS Checkpoint Description:\n\nFixes\n"
        );
    }

    #[test]
    fn test_normalize_author() {
        assert_eq!(normalize_author("Jürgen Größe"), "Juergen Groesse");
        assert_eq!(normalize_author(" Ärger <x> "), "Aerger x");
    }

    #[test]
    fn test_tag_name_sanitization() {
        let checkpoint = Checkpoint {
            number: "1.4".to_string(),
            author: "Alice".to_string(),
            timestamp: 0,
            label: "a:b|c d".to_string(),
            description: String::new(),
        };
        let tag = checkpoint.tag_name();

        assert_eq!(tag, "1.4__abc_d");
        assert!(!tag.contains(':'));
        assert!(!tag.contains('|'));
        assert!(!tag.contains(' '));
        assert!(!tag.ends_with('.'));
    }

    #[test]
    fn test_sanitize_tag_substitutions_and_trailing_dots() {
        assert_eq!(sanitize_tag("release_1 final..."), "release-1_final");
        assert_eq!(sanitize_tag("v1..2"), "v1.2");
        assert_eq!(sanitize_tag("branch.lock"), "branch");
        assert_eq!(sanitize_tag("a/b~c^d"), "a-bcd");
    }

    #[test]
    fn test_tag_name_with_fully_illegal_label_falls_back_to_number() {
        let checkpoint = Checkpoint {
            number: "1.9".to_string(),
            author: String::new(),
            timestamp: 0,
            label: "???".to_string(),
            description: String::new(),
        };
        assert_eq!(checkpoint.tag_name(), "1.9");
    }
}
