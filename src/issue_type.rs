//! Shared issue-type namespace checks.
//!
//! The original source checks these prefixes inline in three different
//! places (auto-analysis, clustering, search); consolidated here per
//! `SPEC_FULL.md` §10.5.

/// "No defect" namespace: a prior triage decision that this failure is not
/// a product defect. Case-insensitive `nd`/`ND` prefix (§4.5).
pub fn is_no_defect(issue_type: &str) -> bool {
    issue_type.len() >= 2 && issue_type.as_bytes()[..2].eq_ignore_ascii_case(b"nd")
}

/// "To investigate" namespace: the target of [`crate::search_service`]
/// (§4.7). Case-insensitive `ti`/`TI` prefix.
pub fn is_to_investigate(issue_type: &str) -> bool {
    issue_type.len() >= 2 && issue_type.as_bytes()[..2].eq_ignore_ascii_case(b"ti")
}
