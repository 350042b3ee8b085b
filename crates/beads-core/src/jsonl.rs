//! JSONL (JSON Lines) read/write support.
//!
//! Each line in a JSONL file is a complete JSON object representing one Issue.
//! Because the file lives in version control, lines may carry merge-conflict
//! markers (`<<<<<<<`, `=======`, `>>>>>>>`) left behind by a bad merge;
//! those lines are skipped rather than treated as malformed JSON.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use crate::issue::Issue;

/// Returns true if `line` is a git/dolt conflict marker line.
fn is_conflict_marker(line: &str) -> bool {
    line.starts_with("<<<<<<<") || line.starts_with("=======") || line.starts_with(">>>>>>>")
}

/// Error type for JSONL operations.
#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error at line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
}

/// Result alias for JSONL operations.
pub type Result<T> = std::result::Result<T, JsonlError>;

/// Writes issues as JSONL to the given writer.
///
/// Each issue is written as a single JSON line followed by a newline.
pub fn write_jsonl<W: Write>(writer: &mut W, issues: &[Issue]) -> Result<()> {
    for issue in issues {
        serde_json::to_writer(&mut *writer, issue)
            .map_err(|e| JsonlError::Json { line: 0, source: e })?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Returns an iterator that reads issues from a JSONL reader.
///
/// Each line is parsed as a JSON object. Empty lines are skipped.
pub fn read_jsonl<R: BufRead>(reader: R) -> JsonlIter<R> {
    JsonlIter {
        reader,
        line_number: 0,
    }
}

/// Iterator over JSONL-encoded issues.
pub struct JsonlIter<R> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> Iterator for JsonlIter<R> {
    type Item = Result<Issue>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None, // EOF
                Ok(_) => {
                    self.line_number += 1;
                    let trimmed = line.trim();
                    if trimmed.is_empty() || is_conflict_marker(trimmed) {
                        continue; // skip empty lines and conflict markers
                    }
                    match serde_json::from_str::<Issue>(trimmed) {
                        Ok(issue) => return Some(Ok(issue)),
                        Err(e) => {
                            return Some(Err(JsonlError::Json {
                                line: self.line_number,
                                source: e,
                            }));
                        }
                    }
                }
                Err(e) => return Some(Err(JsonlError::Io(e))),
            }
        }
    }
}

/// Loads a full issue set from a JSONL reader into an in-memory map keyed
/// by ID, for bootstrapping a fresh backend from an exported database.
///
/// Malformed lines (including unresolved conflict markers that slipped
/// past [`is_conflict_marker`]) are reported as errors. A later line
/// repeating an ID already seen earlier in the file is skipped silently --
/// first write wins, matching how a backend reconstructs a file that was
/// appended to out of order.
pub fn bootstrap<R: BufRead>(reader: R) -> Result<HashMap<String, Issue>> {
    let mut issues = HashMap::new();
    for result in read_jsonl(reader) {
        let issue = result?;
        issues.entry(issue.id.clone()).or_insert(issue);
    }
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;
    use std::io::BufReader;

    #[test]
    fn write_and_read_roundtrip() {
        let issues = vec![
            IssueBuilder::new("Issue 1")
                .id("bd-001")
                .priority(1)
                .build(),
            IssueBuilder::new("Issue 2")
                .id("bd-002")
                .priority(2)
                .build(),
        ];

        let mut buf = Vec::new();
        write_jsonl(&mut buf, &issues).unwrap();

        let reader = BufReader::new(buf.as_slice());
        let read_back: Vec<Issue> = read_jsonl(reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].title, "Issue 1");
        assert_eq!(read_back[1].title, "Issue 2");
    }

    #[test]
    fn read_skips_empty_lines() {
        let data = b"{\"title\":\"A\"}\n\n{\"title\":\"B\"}\n";
        let reader = BufReader::new(data.as_slice());
        let results: Vec<Issue> = read_jsonl(reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn read_reports_line_number_on_error() {
        let data = b"{\"title\":\"A\"}\nnot-json\n";
        let reader = BufReader::new(data.as_slice());
        let results: Vec<_> = read_jsonl(reader).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(JsonlError::Json { line, .. }) => assert_eq!(*line, 2),
            other => panic!("expected JSON error, got {:?}", other),
        }
    }

    #[test]
    fn read_skips_conflict_markers() {
        let data = b"<<<<<<< HEAD\n{\"title\":\"A\"}\n=======\n{\"title\":\"B\"}\n>>>>>>> branch\n";
        let reader = BufReader::new(data.as_slice());
        let results: Vec<Issue> = read_jsonl(reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "A");
        assert_eq!(results[1].title, "B");
    }

    #[test]
    fn bootstrap_builds_id_keyed_map() {
        let issues = vec![
            IssueBuilder::new("First").id("bd-001").build(),
            IssueBuilder::new("Second").id("bd-002").build(),
        ];
        let mut buf = Vec::new();
        write_jsonl(&mut buf, &issues).unwrap();

        let map = bootstrap(BufReader::new(buf.as_slice())).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["bd-001"].title, "First");
        assert_eq!(map["bd-002"].title, "Second");
    }

    #[test]
    fn bootstrap_first_write_wins_on_duplicate_id() {
        let data = b"{\"id\":\"bd-001\",\"title\":\"Original\"}\n{\"id\":\"bd-001\",\"title\":\"Duplicate\"}\n";
        let map = bootstrap(BufReader::new(data.as_slice())).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["bd-001"].title, "Original");
    }
}
