//! CJK-aware keyword frequency analysis over the issue dataset.
//!
//! Record text is cleaned (HTML stripped, punctuation dropped), segmented
//! with jieba so Han-script runs split into multi-character terms while
//! Latin/digit tokens stay whole, then filtered against a curated stop
//! list. The stop list removes connective noise only; domain vocabulary
//! (缺陷, 需求, 模块, 用户, 测试, …) is deliberately kept.

use jieba_rs::Jieba;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::{IssueDataset, IssueRecord};
use crate::rubric::strip_html;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// Connectives and filler words dropped before counting.
const STOP_WORDS: &[&str] = &[
    // connectives and pronouns
    "的", "了", "在", "是", "我", "你", "他", "她", "它", "们", "这", "那", "与", "和", "或",
    "但", "而", "因为", "所以", "如果", "就", "都", "很", "还", "也", "不", "没有", "有",
    "能", "会", "要", "可以", "应该", "可能", "已经", "正在", "将要", "一个", "一些",
    // generic descriptors
    "其他", "其它", "等等", "等", "及", "以及", "包括", "含有", "具有",
    "按照", "依据", "来自", "来源", "来源于", "属于", "归属",
    "首先", "然后", "接着", "同时", "此外", "另外", "除了", "除此之外",
    // generic temporal words
    "当前", "目前", "现在", "当时", "之前", "之后", "以前", "以后", "最后", "最终",
];

/// Category labels with the literal vocabulary each one matches.
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "问题缺陷类",
        &[
            "问题", "解决", "修复", "bug", "缺陷", "错误", "异常", "故障", "失败", "崩溃",
            "阻塞", "影响", "风险", "漏洞",
        ],
    ),
    (
        "需求功能类",
        &[
            "需求", "功能", "特性", "优化", "改进", "新增", "删除", "变更", "升级", "扩展",
            "配置", "设置",
        ],
    ),
    (
        "技术实现类",
        &[
            "模块", "系统", "平台", "服务", "接口", "api", "数据库", "缓存", "算法", "框架",
            "代码", "部署", "服务器", "网络", "安全", "性能", "架构",
        ],
    ),
    (
        "角色人员类",
        &[
            "用户", "客户", "管理员", "开发", "测试", "运维", "产品", "设计师", "分析师",
            "架构师", "项目经理",
        ],
    ),
    (
        "业务流程类",
        &[
            "业务", "流程", "步骤", "环节", "阶段", "过程", "方案", "策略", "规则", "逻辑",
            "条件", "判断", "验证", "审核",
        ],
    ),
    (
        "状态描述类",
        &[
            "完成", "待处理", "进行中", "暂停", "取消", "成功", "正常", "有效", "无效",
            "开启", "关闭", "启用", "禁用",
        ],
    ),
];

const CORE_FIELDS: &[&str] = &["name", "description", "test_focus", "label"];
const EXTENDED_FIELDS: &[&str] = &["acceptance", "comment", "status", "priority", "iteration_id"];

/// Result of `ilens keywords`.
#[derive(Debug, Serialize)]
pub struct KeywordReport {
    pub status: &'static str,
    pub analysis_config: Value,
    pub total_tokens: usize,
    pub unique_tokens: usize,
    pub high_frequency_tokens: serde_json::Map<String, Value>,
    pub frequency_distribution: serde_json::Map<String, Value>,
    pub top_20_tokens: serde_json::Map<String, Value>,
    pub category_keywords: serde_json::Map<String, Value>,
}

/// Run the frequency analysis. Deterministic for a fixed dataset and
/// parameters: ties sort by token string.
pub fn analyze(
    dataset: &IssueDataset,
    min_frequency: usize,
    use_extended_fields: bool,
) -> KeywordReport {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total_tokens = 0usize;

    for record in dataset.stories.iter().chain(dataset.bugs.iter()) {
        let text = record_text(record, use_extended_fields);
        for token in tokenize(&text) {
            total_tokens += 1;
            *counts.entry(token).or_insert(0) += 1;
        }
    }

    // Stable ordering: count desc, then token asc.
    let mut sorted: Vec<(String, usize)> = counts.iter().map(|(t, c)| (t.clone(), *c)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let high_frequency: Vec<&(String, usize)> = sorted
        .iter()
        .filter(|(_, count)| *count >= min_frequency)
        .collect();

    let mut high_map = serde_json::Map::new();
    for (token, count) in &high_frequency {
        high_map.insert(token.clone(), json!(count));
    }

    let mut top_20 = serde_json::Map::new();
    for (token, count) in sorted.iter().take(20) {
        top_20.insert(token.clone(), json!(count));
    }

    let mut distribution = serde_json::Map::new();
    for bin in ["100+", "50-99", "20-49", "10-19", "5-9", "1-4"] {
        distribution.insert(bin.to_string(), json!(0));
    }
    for (_, count) in &sorted {
        let bin = frequency_bin(*count);
        let slot = distribution.get(bin).and_then(Value::as_u64).unwrap_or(0);
        distribution.insert(bin.to_string(), json!(slot + 1));
    }

    let mut categories = serde_json::Map::new();
    for (label, vocab) in CATEGORIES {
        let members: Vec<&str> = high_frequency
            .iter()
            .filter(|(token, _)| vocab.iter().any(|keyword| token.contains(keyword)))
            .map(|(token, _)| token.as_str())
            .collect();
        if !members.is_empty() {
            categories.insert(label.to_string(), json!(members));
        }
    }

    let mut analyzed_fields: Vec<&str> = CORE_FIELDS.to_vec();
    if use_extended_fields {
        analyzed_fields.extend_from_slice(EXTENDED_FIELDS);
    }

    KeywordReport {
        status: "success",
        analysis_config: json!({
            "min_frequency": min_frequency,
            "use_extended_fields": use_extended_fields,
            "analyzed_fields": analyzed_fields,
            "stories_count": dataset.stories.len(),
            "bugs_count": dataset.bugs.len(),
        }),
        total_tokens,
        unique_tokens: sorted.len(),
        high_frequency_tokens: high_map,
        frequency_distribution: distribution,
        top_20_tokens: top_20,
        category_keywords: categories,
    }
}

/// Concatenate the selected string fields of one record.
fn record_text(record: &IssueRecord, use_extended_fields: bool) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let title = record.display_title();
    if !title.is_empty() {
        parts.push(title);
    }
    for part in [&record.description, &record.test_focus, &record.label] {
        if !part.is_empty() {
            parts.push(part);
        }
    }
    let mut text = parts.join(" ");

    if use_extended_fields {
        for field in ["acceptance", "comment"] {
            if let Some(value) = record.extra.get(field).and_then(Value::as_str) {
                if !value.is_empty() {
                    text.push(' ');
                    text.push_str(value);
                }
            }
        }
        for value in [&record.status, &record.priority, &record.iteration_id] {
            if !value.is_empty() {
                text.push(' ');
                text.push_str(value);
            }
        }
    }
    text
}

/// Clean, segment, and filter one text into counted tokens.
fn tokenize(text: &str) -> Vec<String> {
    let cleaned = clean_text(text);
    jieba()
        .cut(&cleaned, false)
        .into_iter()
        .filter_map(|raw| {
            let token = raw.trim();
            if token.chars().count() <= 1 {
                return None;
            }
            if token.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let normalized = if token.is_ascii() {
                token.to_ascii_lowercase()
            } else {
                token.to_string()
            };
            if STOP_WORDS.contains(&normalized.as_str()) {
                return None;
            }
            Some(normalized)
        })
        .collect()
}

/// Strip HTML, keep CJK/Latin/digit characters, collapse the rest to spaces.
fn clean_text(text: &str) -> String {
    strip_html(text)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() || is_han(c) {
                c
            } else {
                ' '
            }
        })
        .collect()
}

fn is_han(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

fn frequency_bin(count: usize) -> &'static str {
    match count {
        100.. => "100+",
        50..=99 => "50-99",
        20..=49 => "20-49",
        10..=19 => "10-19",
        5..=9 => "5-9",
        _ => "1-4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story_with(description: &str) -> IssueRecord {
        IssueRecord {
            id: "s".to_string(),
            name: "需求".to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tokenize_filters_noise() {
        let tokens = tokenize("用户登录失败 的 1234 a API接口");
        assert!(tokens.contains(&"用户".to_string()) || tokens.contains(&"用户登录".to_string()));
        // Pure digits and single chars are gone, stop word 的 is gone.
        assert!(!tokens.iter().any(|t| t == "1234"));
        assert!(!tokens.iter().any(|t| t == "a"));
        assert!(!tokens.iter().any(|t| t == "的"));
        // Latin tokens are lowercased.
        assert!(tokens.iter().any(|t| t == "api" || t.contains("api")));
    }

    #[test]
    fn test_frequency_bins() {
        assert_eq!(frequency_bin(150), "100+");
        assert_eq!(frequency_bin(50), "50-99");
        assert_eq!(frequency_bin(20), "20-49");
        assert_eq!(frequency_bin(10), "10-19");
        assert_eq!(frequency_bin(5), "5-9");
        assert_eq!(frequency_bin(1), "1-4");
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let dataset = IssueDataset {
            stories: vec![
                story_with("订单模块出现支付问题，需要修复支付接口"),
                story_with("订单模块的支付功能优化"),
            ],
            bugs: vec![],
        };
        let a = analyze(&dataset, 2, true);
        let b = analyze(&dataset, 2, true);
        assert_eq!(a.total_tokens, b.total_tokens);
        assert_eq!(a.unique_tokens, b.unique_tokens);
        assert_eq!(
            serde_json::to_string(&a.high_frequency_tokens).unwrap(),
            serde_json::to_string(&b.high_frequency_tokens).unwrap()
        );
    }

    #[test]
    fn test_high_frequency_threshold() {
        let dataset = IssueDataset {
            stories: vec![
                story_with("支付失败"),
                story_with("支付失败"),
                story_with("支付失败"),
            ],
            bugs: vec![],
        };
        let report = analyze(&dataset, 3, false);
        assert!(report.high_frequency_tokens.contains_key("支付"));
        for (_, count) in &report.high_frequency_tokens {
            assert!(count.as_u64().unwrap() >= 3);
        }
    }

    #[test]
    fn test_category_assignment() {
        let dataset = IssueDataset {
            stories: vec![
                story_with("支付模块缺陷"),
                story_with("支付模块缺陷"),
                story_with("支付模块缺陷"),
            ],
            bugs: vec![],
        };
        let report = analyze(&dataset, 2, false);
        let defects = report
            .category_keywords
            .get("问题缺陷类")
            .and_then(Value::as_array);
        assert!(defects.is_some_and(|v| v.iter().any(|t| t.as_str() == Some("缺陷"))));
    }

    #[test]
    fn test_empty_dataset_zero_counts() {
        let report = analyze(&IssueDataset::default(), 3, true);
        assert_eq!(report.total_tokens, 0);
        assert_eq!(report.unique_tokens, 0);
        assert!(report.high_frequency_tokens.is_empty());
    }
}
