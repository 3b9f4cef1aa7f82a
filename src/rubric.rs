//! Rubric configuration and the requirement knowledge base.
//!
//! Both live as JSON under `config/`:
//!
//! - `test_case_rules.json` — the rubric governing acceptable test-case
//!   shapes (title length, step count, priority mix targets).
//! - `require_list_config.json` — requirement entries that give the LLM
//!   evaluator business context.
//!
//! A missing or invalid rubric falls back to the built-in defaults and is
//! written back to disk, so the file is always present and editable after
//! the first run.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Paths;
use crate::models::{IssueDataset, IssueRecord};
use crate::store;

/// Inclusive percentage band for one priority label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RatioRange {
    pub min: u32,
    pub max: u32,
}

/// The configurable policy governing acceptable test-case shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub title_max_length: u32,
    pub max_steps: u32,
    pub priority_ratios: BTreeMap<String, RatioRange>,
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl Default for Rubric {
    fn default() -> Self {
        let mut ratios = BTreeMap::new();
        ratios.insert("P0".to_string(), RatioRange { min: 10, max: 20 });
        ratios.insert("P1".to_string(), RatioRange { min: 60, max: 70 });
        ratios.insert("P2".to_string(), RatioRange { min: 10, max: 30 });
        Rubric {
            title_max_length: 40,
            max_steps: 10,
            priority_ratios: ratios,
            version: "1.0".to_string(),
            last_updated: None,
        }
    }
}

impl Rubric {
    /// Load the rubric, creating the default file when missing. An invalid
    /// file is replaced by the defaults with a warning rather than failing
    /// the evaluation run.
    pub fn load_or_create(paths: &Paths) -> Result<Rubric> {
        let path = paths.rubric_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read rubric: {}", path.display()))?;
            match serde_json::from_str::<Rubric>(&content) {
                Ok(rubric) if rubric.is_valid() => return Ok(rubric),
                Ok(_) => tracing::warn!("rubric has invalid ranges, using defaults"),
                Err(e) => tracing::warn!("rubric unreadable ({}), using defaults", e),
            }
        }
        let rubric = Rubric::default();
        rubric.save(paths)?;
        Ok(rubric)
    }

    pub fn save(&self, paths: &Paths) -> Result<()> {
        let mut stamped = self.clone();
        stamped.last_updated = Some(Local::now().format("%Y-%m-%dT%H:%M:%S").to_string());
        store::save_json(&paths.rubric_path(), &stamped)
    }

    fn is_valid(&self) -> bool {
        self.title_max_length > 0
            && self.max_steps > 0
            && !self.priority_ratios.is_empty()
            && self
                .priority_ratios
                .values()
                .all(|r| r.min <= r.max && r.max <= 100)
    }
}

/// One requirement entry carried into evaluation prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementEntry {
    #[serde(default)]
    pub requirement_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub local_created_time: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The requirement knowledge base backing test-case evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub requirements: Vec<RequirementEntry>,
}

impl KnowledgeBase {
    /// Load the knowledge base; a missing file yields an empty base.
    /// Entries written by older versions get `local_created_time`
    /// back-filled from their tracker `created` field.
    pub fn load(paths: &Paths) -> Result<KnowledgeBase> {
        let map = store::load_json(&paths.knowledge_base_path())?;
        if map.is_empty() {
            return Ok(KnowledgeBase::default());
        }
        let mut kb: KnowledgeBase =
            serde_json::from_value(serde_json::Value::Object(map)).with_context(|| {
                format!(
                    "Malformed knowledge base: {}",
                    paths.knowledge_base_path().display()
                )
            })?;
        for entry in &mut kb.requirements {
            if entry.local_created_time.is_empty() {
                entry.local_created_time = entry
                    .extra
                    .get("created")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
            }
        }
        Ok(kb)
    }

    pub fn save(&self, paths: &Paths) -> Result<()> {
        let payload = serde_json::json!({
            "requirements": self.requirements,
            "total_count": self.requirements.len(),
            "last_updated": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        store::save_json(&paths.knowledge_base_path(), &payload)
    }

    /// Import requirement entries from the stories of a dataset, skipping
    /// ids already present. Returns the number of entries added.
    pub fn extract_from_dataset(&mut self, dataset: &IssueDataset) -> usize {
        let mut added = 0;
        for story in &dataset.stories {
            if story.id.is_empty()
                || self
                    .requirements
                    .iter()
                    .any(|r| r.requirement_id == story.id)
            {
                continue;
            }
            self.requirements.push(entry_from_story(story));
            added += 1;
        }
        added
    }

    /// Compact rendering for evaluation prompts: at most five entries with
    /// truncated descriptions, plus a count of the remainder.
    pub fn render_for_evaluation(&self) -> String {
        if self.requirements.is_empty() {
            return "当前没有可用的需求单信息。".to_string();
        }
        let mut lines = vec!["需求单信息摘要：".to_string()];
        for (i, req) in self.requirements.iter().take(5).enumerate() {
            lines.push(format!("\n{}. 需求ID: {}", i + 1, req.requirement_id));
            lines.push(format!("   标题: {}", req.title));
            lines.push(format!("   描述: {}", truncate_chars(&req.description, 100)));
            lines.push(format!("   创建时间: {}", req.local_created_time));
        }
        if self.requirements.len() > 5 {
            lines.push(format!("\n... 还有 {} 个需求单", self.requirements.len() - 5));
        }
        lines.join("\n")
    }
}

fn entry_from_story(story: &IssueRecord) -> RequirementEntry {
    RequirementEntry {
        requirement_id: story.id.clone(),
        title: story.name.clone(),
        description: strip_html(&story.description),
        priority: story.priority.clone(),
        local_created_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        extra: serde_json::Map::new(),
    }
}

/// Drop HTML tags and collapse whitespace; tracker descriptions arrive as
/// rich text.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let prefix: String = s.chars().take(max).collect();
        format!("{}...", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_rubric_written_on_first_load() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::at(tmp.path()).unwrap();
        let rubric = Rubric::load_or_create(&paths).unwrap();
        assert_eq!(rubric.title_max_length, 40);
        assert_eq!(rubric.priority_ratios["P1"], RatioRange { min: 60, max: 70 });
        assert!(paths.rubric_path().exists());
    }

    #[test]
    fn test_invalid_rubric_replaced_by_default() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::at(tmp.path()).unwrap();
        std::fs::create_dir_all(paths.config_dir()).unwrap();
        std::fs::write(paths.rubric_path(), r#"{"title_max_length":0}"#).unwrap();
        let rubric = Rubric::load_or_create(&paths).unwrap();
        assert_eq!(rubric.max_steps, 10);
    }

    #[test]
    fn test_extract_skips_duplicates() {
        let dataset = IssueDataset {
            stories: vec![
                IssueRecord {
                    id: "r1".to_string(),
                    name: "需求一".to_string(),
                    description: "<p>描述&nbsp;正文</p>".to_string(),
                    ..Default::default()
                },
                IssueRecord {
                    id: "r1".to_string(),
                    ..Default::default()
                },
            ],
            bugs: vec![],
        };
        let mut kb = KnowledgeBase::default();
        assert_eq!(kb.extract_from_dataset(&dataset), 1);
        assert_eq!(kb.requirements[0].description, "描述 正文");
        assert_eq!(kb.extract_from_dataset(&dataset), 0);
    }

    #[test]
    fn test_render_caps_at_five_entries() {
        let kb = KnowledgeBase {
            requirements: (0..7)
                .map(|i| RequirementEntry {
                    requirement_id: format!("r{}", i),
                    title: format!("需求{}", i),
                    ..Default::default()
                })
                .collect(),
        };
        let rendered = kb.render_for_evaluation();
        assert!(rendered.contains("需求ID: r4"));
        assert!(!rendered.contains("需求ID: r5"));
        assert!(rendered.contains("还有 2 个需求单"));
    }

    #[test]
    fn test_render_empty_base() {
        assert!(KnowledgeBase::default()
            .render_for_evaluation()
            .contains("没有可用"));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<div>a &lt;b&gt;  c</div>"), "a <b> c");
    }
}
