//! Core data models used throughout issuelens.
//!
//! These types represent the issue records, chunks, and evaluation artifacts
//! that flow through the analysis pipeline:
//!
//! ```text
//! tracker JSON → IssueDataset → chunk() → ChunkMeta + text
//!                                   ↓
//!                              embed() → vector index
//!                                   ↓
//!                             search() → SearchHit
//!
//! spreadsheet → TestCase → evaluate() → CaseEvaluation
//! ```
//!
//! An [`IssueRecord`] deliberately keeps every unrecognized wire field in
//! `extra`, so search results can echo the full original record back to the
//! caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The two record kinds carried by an issue dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Story,
    Bug,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Story => "story",
            IssueKind::Bug => "bug",
        }
    }
}

impl std::str::FromStr for IssueKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "story" => Ok(IssueKind::Story),
            "bug" => Ok(IssueKind::Bug),
            other => anyhow::bail!("Unknown issue kind: {}. Use story or bug.", other),
        }
    }
}

/// One issue-tracker record (a story or a bug).
///
/// Field names follow the tracker wire format. Stories carry `name`,
/// `iteration_id`, `begin`, and `due`; bugs carry `title`, `severity`,
/// `reporter`, and `regression_number`. Timestamps are
/// `YYYY-MM-DD HH:MM:SS` strings. Status and priority are opaque labels.
///
/// Records are immutable within one run. Unknown wire fields land in
/// `extra` and survive serialization round trips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Story title.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Bug title.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority: String,
    /// Bug severity label.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub severity: String,
    /// Story author.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub creator: String,
    /// Bug author.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reporter: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iteration_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub regression_number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub modified: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub begin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub due: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub test_focus: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// Unrecognized wire fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl IssueRecord {
    /// The display title regardless of kind.
    pub fn display_title(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }

    /// Look up a time field by name (`created`, `modified`, `begin`, `due`).
    pub fn time_field(&self, field: &str) -> &str {
        match field {
            "created" => &self.created,
            "modified" => &self.modified,
            "begin" => &self.begin,
            "due" => &self.due,
            _ => "",
        }
    }
}

/// The authoritative dataset: two ordered record sequences, persisted as
/// one JSON document. Regeneration replaces it wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueDataset {
    #[serde(default)]
    pub stories: Vec<IssueRecord>,
    #[serde(default)]
    pub bugs: Vec<IssueRecord>,
}

impl IssueDataset {
    pub fn records_of(&self, kind: IssueKind) -> &[IssueRecord] {
        match kind {
            IssueKind::Story => &self.stories,
            IssueKind::Bug => &self.bugs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty() && self.bugs.is_empty()
    }
}

/// Sidecar metadata for one embedded chunk.
///
/// | Field | Description |
/// |-------|-------------|
/// | `chunk_id` | `<kind>_<chunk_index>_<hash>` — stable across rebuilds |
/// | `item_type` | Kind shared by every record in the chunk |
/// | `item_ids` | Source record ids, in chunk order |
/// | `item_count` | Number of records in the chunk |
/// | `chunk_index` | Position within the kind's chunk sequence |
/// | `original_items` | Verbatim record copies, echoed on search |
/// | `text` | The joined canonical text that was embedded |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub chunk_id: String,
    pub item_type: IssueKind,
    pub item_ids: Vec<String>,
    pub item_count: usize,
    pub chunk_index: usize,
    pub original_items: Vec<IssueRecord>,
    pub text: String,
}

/// One row returned by a top-k index query. Score is cosine similarity
/// in `[-1, 1]`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub metadata: ChunkMeta,
}

/// A test case loaded from a spreadsheet and normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub precondition: String,
    #[serde(default)]
    pub steps: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub priority: String,
}

/// One scored field row parsed from an LLM evaluation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEvaluation {
    pub field: String,
    pub content: String,
    /// Score 0–10; `None` when the model answered `-`.
    pub score: Option<i64>,
    pub suggestion: Option<String>,
}

/// All parsed evaluations for one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseEvaluation {
    pub case_id: String,
    pub evaluations: Vec<FieldEvaluation>,
    /// Present when the reply for this case could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Per-date aggregate produced by the time-trend analyzer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyAggregate {
    pub date: String,
    pub total: u64,
    pub completed: u64,
    pub new_count: u64,
    pub high_priority: u64,
    pub medium_priority: u64,
    pub low_priority: u64,
    pub status_counts: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_preserved() {
        let raw = r#"{"id":"1001","name":"订单列表分页","workitem_type_id":"story-A"}"#;
        let record: IssueRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.id, "1001");
        assert_eq!(record.extra["workitem_type_id"], "story-A");

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["workitem_type_id"], "story-A");
        // Empty optional fields stay off the wire.
        assert!(back.get("severity").is_none());
    }

    #[test]
    fn test_time_field_lookup() {
        let record = IssueRecord {
            created: "2025-01-01 08:00:00".to_string(),
            due: "2025-02-01".to_string(),
            ..Default::default()
        };
        assert_eq!(record.time_field("created"), "2025-01-01 08:00:00");
        assert_eq!(record.time_field("due"), "2025-02-01");
        assert_eq!(record.time_field("begin"), "");
        assert_eq!(record.time_field("nope"), "");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("story".parse::<IssueKind>().unwrap(), IssueKind::Story);
        assert!("epic".parse::<IssueKind>().is_err());
    }
}
