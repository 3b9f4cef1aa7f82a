//! LLM-driven rubric evaluation of test cases.
//!
//! The evaluator loads a rubric and the requirement knowledge base, builds
//! a dynamic prompt template, splits the cases into token-bounded batches,
//! sends one LLM call per batch, and parses the Markdown-table replies into
//! per-field scores.
//!
//! # Token budget
//!
//! For a context window `W`:
//!
//! ```text
//! slack            = 25% of W            (unconditional reserve)
//! usable           = 75% of W
//! request budget   = 25% of usable  −  measured static-template tokens
//! response budget  = 50% of usable
//! batch threshold  = 75% of the remaining request budget
//! ```
//!
//! # Batch lifecycle
//!
//! `Pending → InFlight → (Parsed | ParseError | ApiError)`. A failed batch
//! is recorded with its index and error; later batches still run. Batches
//! are paced one second apart. The emitted per-case list is ordered by
//! (batch index, case index within batch).

use chrono::Local;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::config::Paths;
use crate::error::OpError;
use crate::markdown;
use crate::models::{CaseEvaluation, FieldEvaluation, TestCase};
use crate::rubric::{KnowledgeBase, RatioRange, Rubric};
use crate::store;
use crate::tokens::{self, TokenCounter};

/// Default LLM context window.
pub const DEFAULT_CONTEXT_WINDOW: usize = 12_000;

/// Spreadsheet column remap for test-case imports.
pub const SPREADSHEET_MAPPING: &[(&str, &str)] = &[
    ("用例ID", "id"),
    ("用例标题", "title"),
    ("前置条件", "precondition"),
    ("步骤描述", "steps"),
    ("预期结果", "expected"),
    ("等级", "priority"),
];

/// Load and normalize test cases from a spreadsheet.
pub fn load_cases(path: &Path) -> Result<Vec<TestCase>, OpError> {
    if !path.exists() {
        return Err(OpError::InputMissing(format!(
            "test-case spreadsheet not found: {}",
            path.display()
        )));
    }
    let rows = store::read_spreadsheet(path, SPREADSHEET_MAPPING)
        .map_err(|e| OpError::InputMalformed(format!("{:#}", e)))?;
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(serde_json::Value::Object(row))
                .map_err(|e| OpError::InputMalformed(format!("bad test-case row: {}", e)))
        })
        .collect()
}

/// Token-budget plan and prompt template for one evaluation run.
pub struct Evaluator {
    rubric: Rubric,
    template: String,
    pub template_tokens: usize,
    pub request_budget: usize,
    pub response_budget: usize,
    pub batch_threshold: usize,
}

impl Evaluator {
    pub fn new(
        rubric: Rubric,
        kb: &KnowledgeBase,
        context_window: usize,
        counter: &TokenCounter,
    ) -> Evaluator {
        let template = build_template(&rubric, &kb.render_for_evaluation());
        // Static cost: the template with the per-batch placeholder blanked.
        let template_tokens = counter.count(&template.replace("{test_cases_json}", ""));

        let slack = context_window / 4;
        let usable = context_window - slack;
        let request_gross = usable / 4;
        let response_budget = usable / 2;
        let request_budget = request_gross.saturating_sub(template_tokens);
        let batch_threshold = request_budget * 3 / 4;

        tracing::info!(
            context_window,
            template_tokens,
            request_budget,
            response_budget,
            batch_threshold,
            "evaluation token plan"
        );

        Evaluator {
            rubric,
            template,
            template_tokens,
            request_budget,
            response_budget,
            batch_threshold,
        }
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// Render the final prompt for one batch.
    pub fn batch_prompt(&self, batch: &[TestCase]) -> String {
        let cases_json =
            serde_json::to_string_pretty(batch).unwrap_or_else(|_| "[]".to_string());
        self.template.replace("{test_cases_json}", &cases_json)
    }
}

/// Dynamic prompt template: rubric thresholds and the KB rendering are
/// substituted immediately, `{test_cases_json}` per batch.
fn build_template(rubric: &Rubric, requirement_info: &str) -> String {
    let ratio = |label: &str| -> String {
        rubric
            .priority_ratios
            .get(label)
            .map(|r| format!("{}%~{}%", r.min, r.max))
            .unwrap_or_else(|| "-".to_string())
    };

    format!(
        "你需要为一批业务测试用例进行打分与评估。请为以下每个测试用例分别生成一个独立的评估表格。

## 重要提示：

1. 每个用例先输出一行标题：`### 用例ID: <真实id>`
2. 紧接着输出该用例的表格，表头为 \"| 内容 | 评分(0-10) | 建议 |\"
3. 表格行依次为 用例标题、前置条件、步骤描述、预期结果
4. 各用例之间用空行分隔，除此以外不需要任何分析或解释
5. 必须从测试用例JSON数据中提取真实的字段内容，不要使用任何占位符

## 需求单信息：

{requirement_info}

## 评分规则：

| 用例要素 | 是否必须 | 要求 |
| ---- | ---- | ---- |
| 关联需求 | 是 | 用例应当与需求单中的一条或多条有关 |
| 用例标题 | 是 | 标题长度不超过 {title_max} 字符，描述测试功能点，语言清晰简洁 |
| 前置条件 | 否 | 列出所有前提（账号类型、灰度等），每个条件不超过 2 项描述 |
| 步骤描述 | 是 | 步骤用编号组织，每步一个动作，不超过 {max_steps} 步，避免步骤中带检查点 |
| 预期结果 | 是 | 描述明确的结果与确切的检查，避免模棱两可的词 |
| 优先级 | 是 | 采用 P0-P2；P0占比 {p0}，P1占比 {p1}，P2占比 {p2} |

* 所有评分满分为 10 分，未提供必须字段给 0 分，每有一点要求未满足酌情扣 1-2 分。
* 未提供前置条件时给 -1 分，便于横向对比。
* 若用例与需求单中任何一条需求都无关给 0 分；相关程度越高分数越高。
* 对低于 10 分的要素给出具体建议，每条建议不超过 100 字。

## 输出格式示例

### 用例ID: 1000001

| 内容 | 评分(0-10) | 建议 |
| --- | --- | --- |
| **用例标题**<br>验证错误密码登录 | 8 | 改为“验证错误密码登录的失败提示” |
| **前置条件**<br>已注册账号 | 7 | 补充系统版本要求 |
| **步骤描述**<br>1. 打开登录页 2. 输入错误密码 | 6 | 步骤2增加输入值示例 |
| **预期结果**<br>提示密码错误 | 7 | 明确提示位置（如输入框下方红色文字） |

## 测试用例JSON数据

{{test_cases_json}}
",
        requirement_info = requirement_info,
        title_max = rubric.title_max_length,
        max_steps = rubric.max_steps,
        p0 = ratio("P0"),
        p1 = ratio("P1"),
        p2 = ratio("P2"),
    )
}

// ============ Reply parsing ============

/// Parse one batch reply into per-case evaluations aligned with the batch.
///
/// Case segments are located by their `用例ID` headers; a case whose table
/// is missing or unparseable gets an empty evaluations list plus a note.
pub fn parse_batch_response(response: &str, batch: &[TestCase]) -> Vec<CaseEvaluation> {
    let segments = split_case_segments(response);

    batch
        .iter()
        .enumerate()
        .map(|(position, case)| {
            let segment = segments
                .iter()
                .find(|s| s.id.as_deref() == Some(case.id.as_str()))
                .or_else(|| segments.get(position).filter(|s| s.id.is_none()));

            match segment {
                Some(segment) => {
                    let evaluations = parse_segment_rows(&segment.text);
                    if evaluations.is_empty() {
                        CaseEvaluation {
                            case_id: case.id.clone(),
                            evaluations: Vec::new(),
                            note: Some("no parseable evaluation table in reply".to_string()),
                        }
                    } else {
                        CaseEvaluation {
                            case_id: case.id.clone(),
                            evaluations,
                            note: None,
                        }
                    }
                }
                None => CaseEvaluation {
                    case_id: case.id.clone(),
                    evaluations: Vec::new(),
                    note: Some("no evaluation found for this case in reply".to_string()),
                },
            }
        })
        .collect()
}

struct CaseSegment {
    id: Option<String>,
    text: String,
}

/// Cut the reply at every `用例ID` header line.
fn split_case_segments(response: &str) -> Vec<CaseSegment> {
    let mut segments: Vec<CaseSegment> = Vec::new();
    for line in response.lines() {
        let is_header = !line.trim_start().starts_with('|') && line.contains("用例ID");
        if is_header || segments.is_empty() {
            segments.push(CaseSegment {
                id: if is_header { extract_case_id(line) } else { None },
                text: String::new(),
            });
        }
        if let Some(segment) = segments.last_mut() {
            segment.text.push_str(line);
            segment.text.push('\n');
        }
    }
    segments
}

/// Pull the id out of a header like `### 用例ID: 1000001`.
fn extract_case_id(line: &str) -> Option<String> {
    let after = line.split("用例ID").nth(1)?;
    let id: String = after
        .trim_start_matches([':', '：', ' ', '*'])
        .trim()
        .trim_matches('*')
        .to_string();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Turn the first table of a segment into field evaluations. A `用例ID`
/// row marks the case and is not itself an evaluation.
fn parse_segment_rows(segment: &str) -> Vec<FieldEvaluation> {
    let tables = markdown::parse_tables(segment);
    let Some(table) = tables.first() else {
        return Vec::new();
    };

    let mut evaluations = Vec::new();
    for row in &table.rows {
        if row.len() < 3 {
            continue;
        }
        let (field, content) = split_field_cell(&row[0]);
        if field.is_empty() || field == "用例ID" {
            continue;
        }
        evaluations.push(FieldEvaluation {
            field,
            content,
            score: parse_score(&row[1]),
            suggestion: match row[2].trim() {
                "" | "-" => None,
                text => Some(text.to_string()),
            },
        });
    }
    evaluations
}

/// Split a cell like `**用例标题**<br>验证登录` into (field, content).
fn split_field_cell(cell: &str) -> (String, String) {
    if let Some((head, rest)) = cell.split_once("<br>") {
        let field = head.replace('*', "").trim().to_string();
        let content = rest.replace("<br>", "\n").replace('*', "").trim().to_string();
        return (field, content);
    }
    // `**字段**内容` without a line break.
    let parts: Vec<&str> = cell.split("**").collect();
    if parts.len() >= 3 {
        let field = parts[1].trim().to_string();
        let content = parts[2..].join("").trim().to_string();
        (field, content)
    } else {
        (cell.replace('*', "").trim().to_string(), String::new())
    }
}

/// First integer in the cell; `-` alone means "not scored".
fn parse_score(cell: &str) -> Option<i64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    let negative = trimmed.starts_with('-');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    let value: i64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

// ============ Priority compliance ============

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceEntry {
    pub count: usize,
    pub percentage: f64,
    pub is_compliant: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriorityAnalysis {
    pub distribution: serde_json::Map<String, serde_json::Value>,
    pub compliance: std::collections::BTreeMap<String, ComplianceEntry>,
    pub rules: std::collections::BTreeMap<String, RatioRange>,
}

/// Percentage distribution over priority labels, checked against the
/// rubric's target bands.
pub fn analyze_priorities(cases: &[TestCase], rubric: &Rubric) -> PriorityAnalysis {
    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for case in cases {
        let label = normalize_priority(&case.priority);
        *counts.entry(label).or_insert(0) += 1;
    }

    let total = cases.len().max(1);
    let mut distribution = serde_json::Map::new();
    let mut compliance = std::collections::BTreeMap::new();

    for (label, count) in &counts {
        let percentage = (*count as f64 / total as f64) * 100.0;
        distribution.insert(label.clone(), json!(percentage));

        let entry = match rubric.priority_ratios.get(label) {
            Some(range) => {
                let ok = (range.min as f64) <= percentage && percentage <= (range.max as f64);
                ComplianceEntry {
                    count: *count,
                    percentage,
                    is_compliant: ok,
                    reason: if ok {
                        format!("within {}% ~ {}%", range.min, range.max)
                    } else if percentage < range.min as f64 {
                        format!("below minimum: {:.1}% < {}%", percentage, range.min)
                    } else {
                        format!("above maximum: {:.1}% > {}%", percentage, range.max)
                    },
                }
            }
            None => ComplianceEntry {
                count: *count,
                percentage,
                is_compliant: false,
                reason: "no rubric rule for this label".to_string(),
            },
        };
        compliance.insert(label.clone(), entry);
    }

    PriorityAnalysis {
        distribution,
        compliance,
        rules: rubric.priority_ratios.clone(),
    }
}

fn normalize_priority(raw: &str) -> String {
    let label = raw.trim().to_ascii_uppercase();
    if label.is_empty() {
        "未设置".to_string()
    } else if label.starts_with('P') && label[1..].chars().all(|c| c.is_ascii_digit()) {
        label
    } else {
        "其他".to_string()
    }
}

// ============ The evaluation run ============

#[derive(Debug, Serialize)]
pub struct BatchError {
    pub batch_index: usize,
    pub error: String,
}

/// Result of `ilens evaluate`, also persisted to
/// `local_data/Proceed_TestCase_<timestamp>.json`.
#[derive(Debug, Serialize)]
pub struct EvaluationRun {
    pub status: &'static str,
    pub evaluation_results: Vec<CaseEvaluation>,
    pub total_count: usize,
    pub process_start_time: String,
    pub process_end_time: String,
    pub priority_analysis: PriorityAnalysis,
    pub rubric: Rubric,
    pub batch_errors: Vec<BatchError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_file: Option<String>,
}

/// Evaluate a spreadsheet of test cases end to end.
pub async fn run_evaluation(
    paths: &Paths,
    spreadsheet: &Path,
    context_window: usize,
    client: &ApiClient,
    cancel: &CancellationToken,
) -> Result<EvaluationRun, OpError> {
    let start_time = Local::now();
    let cases = load_cases(spreadsheet)?;
    let rubric = Rubric::load_or_create(paths).map_err(OpError::Other)?;
    let kb = KnowledgeBase::load(paths).map_err(OpError::Other)?;
    let counter = TokenCounter::shared();
    let evaluator = Evaluator::new(rubric, &kb, context_window, counter);

    let priority_analysis = analyze_priorities(&cases, evaluator.rubric());

    if cases.is_empty() {
        return Ok(EvaluationRun {
            status: "success",
            evaluation_results: Vec::new(),
            total_count: 0,
            process_start_time: start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            process_end_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            priority_analysis,
            rubric: evaluator.rubric().clone(),
            batch_errors: Vec::new(),
            result_file: None,
        });
    }

    // Fail before any HTTP when the selected provider has no credential.
    client.ensure_key()?;

    let estimate =
        |case: &TestCase| counter.count(&serde_json::to_string_pretty(case).unwrap_or_default());

    let mut evaluations: Vec<CaseEvaluation> = Vec::new();
    let mut batch_errors: Vec<BatchError> = Vec::new();
    let mut start = 0usize;
    let mut batch_index = 0usize;

    while start < cases.len() {
        if cancel.is_cancelled() {
            return Err(OpError::Cancelled);
        }
        if batch_index > 0 {
            // Pace batches to stay friendly with provider rate limits.
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let (batch, next, batch_tokens) =
            tokens::split_by_budget(&cases, estimate, evaluator.batch_threshold, start);
        let prompt = evaluator.batch_prompt(batch);
        let request_tokens = counter.count(&prompt);
        let response_tokens = (request_tokens * 2).min(evaluator.response_budget).max(256);

        tracing::info!(
            batch = batch_index,
            cases = batch.len(),
            batch_tokens,
            request_tokens,
            response_tokens,
            "evaluating batch"
        );

        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(OpError::Cancelled),
            result = client.call(&prompt, None, response_tokens) => result,
        };

        match reply {
            Ok(text) => {
                let parsed = parse_batch_response(&text, batch);
                let parse_failures = parsed.iter().filter(|c| c.note.is_some()).count();
                if parse_failures > 0 {
                    tracing::warn!(
                        batch = batch_index,
                        parse_failures,
                        "some cases in batch could not be parsed"
                    );
                }
                evaluations.extend(parsed);
            }
            Err(err) => {
                tracing::warn!(batch = batch_index, error = %err, "batch evaluation failed");
                batch_errors.push(BatchError {
                    batch_index,
                    error: err.to_string(),
                });
            }
        }

        start = next;
        batch_index += 1;
    }

    let end_time = Local::now();
    let result_file = paths.local_data_dir().join(format!(
        "Proceed_TestCase_{}.json",
        start_time.format("%Y%m%d%H%M%S")
    ));

    let run = EvaluationRun {
        status: "success",
        total_count: evaluations.len(),
        evaluation_results: evaluations,
        process_start_time: start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
        process_end_time: end_time.format("%Y-%m-%d %H:%M:%S").to_string(),
        priority_analysis,
        rubric: evaluator.rubric().clone(),
        batch_errors,
        result_file: Some(result_file.display().to_string()),
    };
    store::save_json(&result_file, &run).map_err(OpError::Other)?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, priority: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            title: format!("用例{}", id),
            precondition: "已登录".to_string(),
            steps: "1. 打开页面 2. 点击按钮".to_string(),
            expected: "操作成功".to_string(),
            priority: priority.to_string(),
        }
    }

    fn default_evaluator(window: usize) -> Evaluator {
        let counter = TokenCounter::estimating();
        Evaluator::new(Rubric::default(), &KnowledgeBase::default(), window, &counter)
    }

    #[test]
    fn test_budget_allocation_contract() {
        let counter = TokenCounter::estimating();
        let evaluator =
            Evaluator::new(Rubric::default(), &KnowledgeBase::default(), 12_000, &counter);
        let usable = 12_000 - 12_000 / 4;
        assert_eq!(evaluator.response_budget, usable / 2);
        let expected_request = (usable / 4).saturating_sub(evaluator.template_tokens);
        assert_eq!(evaluator.request_budget, expected_request);
        assert_eq!(evaluator.batch_threshold, expected_request * 3 / 4);
    }

    #[test]
    fn test_template_mentions_rubric_thresholds() {
        let evaluator = default_evaluator(12_000);
        let prompt = evaluator.batch_prompt(&[case("1", "P1")]);
        assert!(prompt.contains("不超过 40 字符"));
        assert!(prompt.contains("不超过 10 步"));
        assert!(prompt.contains("P1占比 60%~70%"));
        assert!(prompt.contains("\"id\": \"1\""));
        assert!(!prompt.contains("{test_cases_json}"));
    }

    #[test]
    fn test_parse_well_formed_reply() {
        let reply = "\
### 用例ID: 1001

| 内容 | 评分(0-10) | 建议 |
| --- | --- | --- |
| **用例标题**<br>验证登录 | 8 | 改为更具体的标题 |
| **前置条件**<br>已注册账号 | -1 | - |
| **步骤描述**<br>1. 打开登录页<br>2. 输入密码 | 6 | 步骤2补充输入值 |
| **预期结果**<br>登录成功 | 7 | 明确跳转页面 |
";
        let batch = vec![case("1001", "P1")];
        let parsed = parse_batch_response(reply, &batch);
        assert_eq!(parsed.len(), 1);
        let evaluation = &parsed[0];
        assert_eq!(evaluation.case_id, "1001");
        assert!(evaluation.note.is_none());
        assert_eq!(evaluation.evaluations.len(), 4);

        let title = &evaluation.evaluations[0];
        assert_eq!(title.field, "用例标题");
        assert_eq!(title.content, "验证登录");
        assert_eq!(title.score, Some(8));
        assert_eq!(title.suggestion.as_deref(), Some("改为更具体的标题"));

        let precondition = &evaluation.evaluations[1];
        assert_eq!(precondition.score, Some(-1));
        assert!(precondition.suggestion.is_none());

        let steps = &evaluation.evaluations[2];
        assert!(steps.content.contains('\n'));
    }

    #[test]
    fn test_parse_multiple_cases_by_id() {
        let reply = "\
### 用例ID: b

| 内容 | 评分(0-10) | 建议 |
| --- | --- | --- |
| **用例标题**<br>乙 | 5 | x |

### 用例ID: a

| 内容 | 评分(0-10) | 建议 |
| --- | --- | --- |
| **用例标题**<br>甲 | 9 | y |
";
        // Reply order differs from batch order; ids win.
        let batch = vec![case("a", "P1"), case("b", "P1")];
        let parsed = parse_batch_response(reply, &batch);
        assert_eq!(parsed[0].case_id, "a");
        assert_eq!(parsed[0].evaluations[0].score, Some(9));
        assert_eq!(parsed[1].case_id, "b");
        assert_eq!(parsed[1].evaluations[0].score, Some(5));
    }

    #[test]
    fn test_parse_missing_table_records_note() {
        let batch = vec![case("1001", "P1")];
        let parsed = parse_batch_response("抱歉，我无法评估这些用例。", &batch);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].evaluations.is_empty());
        assert!(parsed[0].note.is_some());
    }

    #[test]
    fn test_score_parsing() {
        assert_eq!(parse_score("8"), Some(8));
        assert_eq!(parse_score(" 10 "), Some(10));
        assert_eq!(parse_score("-1"), Some(-1));
        assert_eq!(parse_score("-"), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("8分"), Some(8));
    }

    #[test]
    fn test_priority_compliance_scenario() {
        // 20 cases: 2×P0, 14×P1, 4×P2 against the default rubric.
        let mut cases = Vec::new();
        for i in 0..2 {
            cases.push(case(&format!("a{}", i), "P0"));
        }
        for i in 0..14 {
            cases.push(case(&format!("b{}", i), "P1"));
        }
        for i in 0..4 {
            cases.push(case(&format!("c{}", i), "P2"));
        }

        let analysis = analyze_priorities(&cases, &Rubric::default());
        assert_eq!(analysis.distribution["P0"].as_f64().unwrap(), 10.0);
        assert_eq!(analysis.distribution["P1"].as_f64().unwrap(), 70.0);
        assert_eq!(analysis.distribution["P2"].as_f64().unwrap(), 20.0);
        assert!(analysis.compliance.values().all(|c| c.is_compliant));

        let sum: f64 = analysis
            .distribution
            .values()
            .map(|v| v.as_f64().unwrap())
            .sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_priority_out_of_band_flagged() {
        let cases = vec![case("1", "P0"), case("2", "P0"), case("3", "P1")];
        let analysis = analyze_priorities(&cases, &Rubric::default());
        let p0 = &analysis.compliance["P0"];
        assert!(!p0.is_compliant);
        assert!(p0.reason.contains("above maximum"));
    }

    #[test]
    fn test_unknown_labels_bucketed() {
        let cases = vec![case("1", "urgent"), case("2", ""), case("3", "p1")];
        let analysis = analyze_priorities(&cases, &Rubric::default());
        assert_eq!(analysis.compliance["其他"].count, 1);
        assert_eq!(analysis.compliance["未设置"].count, 1);
        assert_eq!(analysis.compliance["P1"].count, 1);
    }

    #[test]
    fn test_batching_respects_threshold_and_order() {
        let evaluator = default_evaluator(32_000);
        let counter = TokenCounter::estimating();
        let cases: Vec<TestCase> = (0..25).map(|i| case(&format!("c{}", i), "P1")).collect();
        let estimate = |c: &TestCase| {
            counter.count(&serde_json::to_string_pretty(c).unwrap_or_default())
        };

        let mut start = 0;
        let mut seen = Vec::new();
        while start < cases.len() {
            let (batch, next, total) =
                tokens::split_by_budget(&cases, estimate, evaluator.batch_threshold, start);
            assert!(!batch.is_empty());
            assert!(total <= evaluator.batch_threshold || batch.len() == 1);
            seen.extend(batch.iter().map(|c| c.id.clone()));
            start = next;
        }
        let expected: Vec<String> = cases.iter().map(|c| c.id.clone()).collect();
        assert_eq!(seen, expected);
    }
}
