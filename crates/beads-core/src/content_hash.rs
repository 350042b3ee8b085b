//! Deterministic content hashing for issues.
//!
//! Produces a SHA-256 hex digest over all substantive fields (excluding ID
//! and timestamps) so that identical content produces identical hashes
//! across all clones, independent of which backend or machine wrote them.

use sha2::{Digest, Sha256};

use crate::issue::Issue;

/// Separator byte written between fields.
const SEP: u8 = 0;

/// Computes a deterministic content hash for an issue.
///
/// Uses all substantive fields (excluding ID and timestamps) to ensure
/// that identical content produces identical hashes.
pub fn compute_content_hash(issue: &Issue) -> String {
    let mut h = Sha256::new();

    // Core fields in stable order.
    write_str(&mut h, &issue.title);
    write_str(&mut h, &issue.description);
    write_str(&mut h, &issue.design);
    write_str(&mut h, &issue.acceptance_criteria);
    write_str(&mut h, &issue.notes);
    write_str(&mut h, &issue.spec_id);
    write_str(&mut h, issue.status.as_str());
    write_int(&mut h, issue.priority);
    write_str(&mut h, issue.issue_type.as_str());
    write_str(&mut h, &issue.assignee);
    write_str(&mut h, &issue.owner);
    write_str(&mut h, &issue.created_by);

    // Optional fields.
    write_str_opt(&mut h, issue.external_ref.as_deref());
    write_str(&mut h, &issue.source_system);
    write_str(&mut h, &issue.source_repo);
    write_flag(&mut h, issue.pinned, "pinned");
    write_flag(&mut h, issue.ephemeral, "ephemeral");
    write_flag(&mut h, issue.is_template, "template");
    write_flag(&mut h, issue.crystallizes, "crystallizes");

    // Metadata is included in the content hash.
    if let Some(ref meta) = issue.metadata {
        write_str(&mut h, meta.get());
    } else {
        h.update([SEP]);
    }

    // Labels hashed in stored order -- callers that want order-independence
    // are expected to sort before persisting.
    for label in &issue.labels {
        write_str(&mut h, label);
    }

    // Gate fields.
    write_str(&mut h, &issue.await_type);
    write_str(&mut h, &issue.await_id);
    write_duration(&mut h, issue.timeout);
    for waiter in &issue.waiters {
        write_str(&mut h, waiter);
    }

    // Agent identity fields.
    write_str(&mut h, &issue.hook_bead);
    write_str(&mut h, &issue.role_bead);
    write_str(&mut h, issue.agent_state.as_str());

    format!("{:x}", h.finalize())
}

// -- helper writers --------------------------------------------------------

fn write_str(h: &mut Sha256, s: &str) {
    h.update(s.as_bytes());
    h.update([SEP]);
}

fn write_int(h: &mut Sha256, n: i32) {
    h.update(n.to_string().as_bytes());
    h.update([SEP]);
}

fn write_str_opt(h: &mut Sha256, s: Option<&str>) {
    if let Some(s) = s {
        h.update(s.as_bytes());
    }
    h.update([SEP]);
}

fn write_duration(h: &mut Sha256, d: Option<std::time::Duration>) {
    let ns = d.map(|d| d.as_nanos() as i64).unwrap_or(0);
    h.update(ns.to_string().as_bytes());
    h.update([SEP]);
}

fn write_flag(h: &mut Sha256, b: bool, label: &str) {
    if b {
        h.update(label.as_bytes());
    }
    h.update([SEP]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;

    #[test]
    fn content_hash_deterministic() {
        let issue = IssueBuilder::new("Test issue")
            .description("A description")
            .priority(2)
            .build();

        let hash1 = compute_content_hash(&issue);
        let hash2 = compute_content_hash(&issue);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 hex = 64 chars
    }

    #[test]
    fn content_hash_differs_on_change() {
        let issue1 = IssueBuilder::new("Title A").build();
        let issue2 = IssueBuilder::new("Title B").build();
        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_ignores_id_and_timestamps() {
        let mut issue1 = IssueBuilder::new("Same content").build();
        let mut issue2 = IssueBuilder::new("Same content").build();

        issue1.id = "bd-aaa".into();
        issue2.id = "bd-bbb".into();
        issue1.created_at = chrono::Utc::now();
        issue2.created_at = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_sensitive_to_labels() {
        let mut issue1 = IssueBuilder::new("Same content").build();
        let mut issue2 = IssueBuilder::new("Same content").build();
        issue1.labels = vec!["a".into()];
        issue2.labels = vec!["b".into()];
        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }
}
