//! Token-budgeted LLM project digest.
//!
//! A time-filtered slice of the dataset is serialized into compact
//! per-record lines. When the whole slice fits inside the token budget
//! (minus prompt overhead and the response reservation) it is summarized
//! in a single call; otherwise the slice is partitioned into groups that
//! each fit, every group is summarized into a bounded paragraph, and a
//! final call merges the paragraphs. Partitioning is greedy in input order,
//! so a fixed budget and input always produce the same groups.

use chrono::NaiveDate;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::error::OpError;
use crate::models::{IssueDataset, IssueKind, IssueRecord};
use crate::tokens::{self, TokenCounter};

/// Default max-total-token budget.
pub const DEFAULT_BUDGET: usize = 12_000;

/// Tokens reserved for each summary response.
const GROUP_RESPONSE_TOKENS: usize = 600;
const MERGE_RESPONSE_TOKENS: usize = 800;

const GROUP_PROMPT: &str = "分析以下项目数据，生成详细的质量分析摘要（150-250字）：

{items}

请从以下维度分析：
1. 功能模块分布和业务特点
2. 需求与缺陷的优先级分布
3. 状态分布和进展情况
4. 潜在的质量风险

生成专业的项目质量分析摘要：";

const MERGE_PROMPT: &str = "将以下多个模块的分析结果合并为一份完整的项目质量概览报告（300-400字）：

{summaries}

请生成综合性的项目质量概览，包含：
1. 项目整体特征和主要业务模块
2. 需求与缺陷的总体分布特点
3. 质量状况评估和风险识别
4. 关键改进建议

项目质量概览：";

/// Result of `ilens overview`.
#[derive(Debug, Serialize)]
pub struct OverviewReport {
    pub status: &'static str,
    pub time_range: String,
    pub stories_considered: usize,
    pub bugs_considered: usize,
    pub groups: usize,
    pub digest: String,
}

/// Generate the digest for records created within `[since, until]`.
pub async fn run_overview(
    dataset: &IssueDataset,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
    budget: usize,
    client: &ApiClient,
    cancel: &CancellationToken,
) -> Result<OverviewReport, OpError> {
    let stories: Vec<&IssueRecord> = filter_by_created(&dataset.stories, since, until);
    let bugs: Vec<&IssueRecord> = filter_by_created(&dataset.bugs, since, until);

    let time_range = format!(
        "{} to {}",
        since.map(|d| d.to_string()).unwrap_or_else(|| "*".into()),
        until.map(|d| d.to_string()).unwrap_or_else(|| "*".into())
    );

    if stories.is_empty() && bugs.is_empty() {
        return Ok(OverviewReport {
            status: "success",
            time_range,
            stories_considered: 0,
            bugs_considered: 0,
            groups: 0,
            digest: "时间范围内没有任何需求或缺陷数据。".to_string(),
        });
    }

    // Fail before any HTTP when the selected provider has no credential.
    client.ensure_key()?;

    let mut lines: Vec<String> = Vec::with_capacity(stories.len() + bugs.len());
    for story in &stories {
        lines.push(render_line(story, IssueKind::Story));
    }
    for bug in &bugs {
        lines.push(render_line(bug, IssueKind::Bug));
    }

    let counter = TokenCounter::shared();
    let overhead = counter.count(GROUP_PROMPT);
    let group_budget = budget
        .saturating_sub(overhead + GROUP_RESPONSE_TOKENS)
        .max(256);

    let groups = partition_lines(&lines, counter, group_budget);
    tracing::info!(
        stories = stories.len(),
        bugs = bugs.len(),
        groups = groups.len(),
        group_budget,
        "overview slice partitioned"
    );

    let mut summaries = Vec::with_capacity(groups.len());
    for (i, group) in groups.iter().enumerate() {
        let prompt = GROUP_PROMPT.replace("{items}", &group.join("\n"));
        let summary = call_with_cancel(client, &prompt, GROUP_RESPONSE_TOKENS, cancel).await?;
        tracing::debug!(group = i + 1, total = groups.len(), "group summarized");
        summaries.push(summary);
    }

    let digest = if summaries.len() == 1 {
        summaries.into_iter().next().unwrap_or_default()
    } else {
        let combined = summaries
            .iter()
            .enumerate()
            .map(|(i, s)| format!("模块{}分析：\n{}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = MERGE_PROMPT.replace("{summaries}", &combined);
        call_with_cancel(client, &prompt, MERGE_RESPONSE_TOKENS, cancel).await?
    };

    Ok(OverviewReport {
        status: "success",
        time_range,
        stories_considered: stories.len(),
        bugs_considered: bugs.len(),
        groups: groups.len(),
        digest,
    })
}

async fn call_with_cancel(
    client: &ApiClient,
    prompt: &str,
    max_tokens: usize,
    cancel: &CancellationToken,
) -> Result<String, OpError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(OpError::Cancelled),
        result = client.call(prompt, None, max_tokens) => Ok(result?),
    }
}

/// Keep records whose created date parses and falls inside the range.
fn filter_by_created<'a>(
    records: &'a [IssueRecord],
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
) -> Vec<&'a IssueRecord> {
    records
        .iter()
        .filter(|r| match crate::trend::parse_issue_date(&r.created) {
            Some(date) => {
                !(since.is_some_and(|s| date < s) || until.is_some_and(|u| date > u))
            }
            None => false,
        })
        .collect()
}

/// One compact line per record for the prompt.
fn render_line(record: &IssueRecord, kind: IssueKind) -> String {
    let marker = match kind {
        IssueKind::Story => "需求",
        IssueKind::Bug => "缺陷",
    };
    let mut line = format!("[{}] {}", marker, record.display_title());
    if !record.status.is_empty() {
        line.push_str(&format!(" (状态:{})", record.status));
    }
    if !record.priority.is_empty() {
        line.push_str(&format!(" (优先级:{})", record.priority));
    }
    line
}

/// Greedy in-order partition; each group's summed line tokens stay within
/// `group_budget` (single oversized lines form a group of one).
fn partition_lines<'a>(
    lines: &'a [String],
    counter: &TokenCounter,
    group_budget: usize,
) -> Vec<&'a [String]> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let (group, next, _) =
            tokens::split_by_budget(lines, |line| counter.count(line), group_budget, start);
        groups.push(group);
        start = next;
    }
    groups
}
