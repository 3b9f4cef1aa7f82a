//! Canonical text projection for issue records.
//!
//! Search indexing and querying both operate on a single joined string per
//! record. The projection keeps a fixed field order per kind so that
//! rebuilding an index over the same dataset reproduces identical chunk
//! text (and therefore identical chunk ids).

use crate::models::{IssueKind, IssueRecord};

/// Project a record to its canonical searchable string.
///
/// Non-empty fields are rendered as `label: value` and joined with `" | "`.
/// The kind and id are always appended so a chunk's text is self-describing:
///
/// ```text
/// name: 订单列表分页 | status: 开发中 | type: story | id: 1001
/// ```
pub fn canonical_text(record: &IssueRecord, kind: IssueKind) -> String {
    let mut parts: Vec<String> = Vec::new();

    let mut push = |label: &str, value: &str| {
        if !value.is_empty() {
            parts.push(format!("{}: {}", label, value));
        }
    };

    match kind {
        IssueKind::Story => {
            push("name", &record.name);
            push("description", &record.description);
            push("status", &record.status);
            push("priority", &record.priority);
            push("creator", &record.creator);
            push("iteration_id", &record.iteration_id);
            push("created", &record.created);
            push("modified", &record.modified);
        }
        IssueKind::Bug => {
            push("title", &record.title);
            push("description", &record.description);
            push("priority", &record.priority);
            push("severity", &record.severity);
            push("status", &record.status);
            push("reporter", &record.reporter);
            push("regression_number", &record.regression_number);
            push("created", &record.created);
            push("modified", &record.modified);
        }
    }

    parts.push(format!("type: {}", kind.as_str()));
    parts.push(format!("id: {}", record.id));
    parts.join(" | ")
}
