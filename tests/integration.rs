use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ilens_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ilens");
    path
}

fn setup_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("local_data")).unwrap();
    tmp
}

fn seed_dataset(root: &Path) {
    let dataset = serde_json::json!({
        "stories": [
            {
                "id": "S1",
                "name": "订单列表分页",
                "description": "订单模块需要支持分页查询",
                "status": "开发中",
                "priority": "high",
                "creator": "张三",
                "created": "2025-01-01 09:00:00",
                "modified": "2025-01-03 10:00:00"
            },
            {
                "id": "S2",
                "name": "订单详情页加载慢",
                "description": "订单详情页性能优化",
                "status": "已完成",
                "priority": "medium",
                "created": "2025-01-01 15:00:00"
            },
            {
                "id": "S3",
                "name": "支付模块重构",
                "description": "支付模块的接口重构",
                "status": "新建",
                "priority": "low",
                "created": "2025-01-02 08:30:00"
            }
        ],
        "bugs": [
            {
                "id": "B1",
                "title": "支付回调超时",
                "description": "支付回调接口偶发超时",
                "status": "新",
                "priority": "urgent",
                "severity": "严重",
                "reporter": "李四",
                "created": "2025-01-02 11:00:00"
            }
        ]
    });
    fs::write(
        root.join("local_data/issue_data.json"),
        serde_json::to_string_pretty(&dataset).unwrap(),
    )
    .unwrap();
}

/// Run `ilens` with the project root pinned and provider keys cleared.
fn run_ilens(root: &Path, args: &[&str]) -> (Value, bool) {
    let output = Command::new(ilens_binary())
        .args(args)
        .env("ILENS_ROOT", root)
        .env_remove("DS_KEY")
        .env_remove("SF_KEY")
        .env_remove("DS_EP")
        .output()
        .expect("failed to run ilens binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let value: Value = serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "non-JSON output ({}): stdout={} stderr={}",
            e,
            stdout,
            String::from_utf8_lossy(&output.stderr)
        )
    });
    (value, output.status.success())
}

#[test]
fn test_rubric_show_creates_default_file() {
    let tmp = setup_project();
    let (value, ok) = run_ilens(tmp.path(), &["rubric", "show"]);
    assert!(ok);
    assert_eq!(value["status"], "success");
    assert_eq!(value["rubric"]["title_max_length"], 40);
    assert_eq!(value["rubric"]["priority_ratios"]["P1"]["min"], 60);
    assert!(tmp.path().join("config/test_case_rules.json").exists());
}

#[test]
fn test_kb_extract_then_list() {
    let tmp = setup_project();
    seed_dataset(tmp.path());

    let (value, ok) = run_ilens(tmp.path(), &["kb", "extract"]);
    assert!(ok);
    assert_eq!(value["added"], 3);

    // A second extract adds nothing new.
    let (value, _) = run_ilens(tmp.path(), &["kb", "extract"]);
    assert_eq!(value["added"], 0);
    assert_eq!(value["total"], 3);

    let (value, ok) = run_ilens(tmp.path(), &["kb", "list"]);
    assert!(ok);
    assert_eq!(value["total"], 3);
    assert_eq!(value["requirements"][0]["requirement_id"], "S1");
}

#[test]
fn test_keywords_over_seeded_dataset() {
    let tmp = setup_project();
    seed_dataset(tmp.path());

    let (value, ok) = run_ilens(tmp.path(), &["keywords", "--min-frequency", "2"]);
    assert!(ok);
    assert_eq!(value["status"], "success");
    assert!(value["total_tokens"].as_u64().unwrap() > 0);
    // 订单 appears in three records.
    assert!(value["high_frequency_tokens"]["订单"].as_u64().unwrap() >= 2);
}

#[test]
fn test_keywords_missing_dataset_is_input_missing() {
    let tmp = setup_project();
    let (value, ok) = run_ilens(tmp.path(), &["keywords"]);
    assert!(!ok);
    assert_eq!(value["status"], "error");
    assert_eq!(value["kind"], "input_missing");
    assert!(value["suggestion"].as_str().unwrap().contains("ilens fetch"));
}

#[test]
fn test_trend_count_aggregates_and_writes_chart() {
    let tmp = setup_project();
    seed_dataset(tmp.path());

    let (value, ok) = run_ilens(
        tmp.path(),
        &[
            "trend",
            "--kind",
            "story",
            "--chart",
            "count",
            "--since",
            "2025-01-01",
            "--until",
            "2025-01-02",
        ],
    );
    assert!(ok, "trend failed: {}", value);
    assert_eq!(value["status"], "success");
    assert_eq!(value["daily_stats"]["2025-01-01"]["total"], 2);
    assert_eq!(value["daily_stats"]["2025-01-02"]["total"], 1);
    assert_eq!(value["total_count"], 3);

    let chart_path = value["chart_path"].as_str().unwrap();
    assert!(chart_path.contains("time_trend"));
    assert!(chart_path.contains("story_count_"));
    assert!(Path::new(chart_path).exists());
    assert!(value["chart_url"].as_str().unwrap().starts_with("file://"));
}

#[test]
fn test_trend_priority_buckets() {
    let tmp = setup_project();
    seed_dataset(tmp.path());

    let (value, ok) = run_ilens(
        tmp.path(),
        &["trend", "--kind", "story", "--chart", "priority"],
    );
    assert!(ok);
    assert_eq!(value["daily_stats"]["2025-01-01"]["high_priority"], 1);
    assert_eq!(value["daily_stats"]["2025-01-01"]["medium_priority"], 1);
    assert_eq!(value["daily_stats"]["2025-01-02"]["low_priority"], 1);
}

#[test]
fn test_search_without_index_is_input_missing() {
    let tmp = setup_project();
    seed_dataset(tmp.path());

    let (value, ok) = run_ilens(tmp.path(), &["search", "订单"]);
    assert!(!ok);
    assert_eq!(value["status"], "error");
    assert_eq!(value["kind"], "input_missing");
}

#[test]
fn test_index_info_without_index_is_input_missing() {
    let tmp = setup_project();
    let (value, ok) = run_ilens(tmp.path(), &["index", "info"]);
    assert!(!ok);
    assert_eq!(value["kind"], "input_missing");
}

#[test]
fn test_overview_without_key_is_config_error() {
    let tmp = setup_project();
    seed_dataset(tmp.path());

    // Default endpoint selects DeepSeek; with DS_KEY unset the operation
    // must fail before attempting any HTTP request.
    let (value, ok) = run_ilens(tmp.path(), &["overview", "--since", "2025-01-01"]);
    assert!(!ok);
    assert_eq!(value["status"], "error");
    assert_eq!(value["kind"], "config_error");
    assert!(value["message"].as_str().unwrap().contains("DS_KEY"));
}

#[test]
fn test_evaluate_without_key_is_config_error() {
    let tmp = setup_project();
    let cases = tmp.path().join("local_data/cases.csv");
    fs::write(
        &cases,
        "用例ID,用例标题,前置条件,步骤描述,预期结果,等级\n\
         1001,验证登录,已注册账号,1. 打开登录页 2. 输入密码,登录成功,P1\n",
    )
    .unwrap();

    let (value, ok) = run_ilens(tmp.path(), &["evaluate", cases.to_str().unwrap()]);
    assert!(!ok);
    assert_eq!(value["kind"], "config_error");
    assert!(value["message"].as_str().unwrap().contains("DS_KEY"));
}

#[test]
fn test_evaluate_missing_spreadsheet_is_input_missing() {
    let tmp = setup_project();
    let (value, ok) = run_ilens(tmp.path(), &["evaluate", "local_data/nope.xlsx"]);
    assert!(!ok);
    assert_eq!(value["kind"], "input_missing");
}

#[test]
fn test_rubric_reset_restores_defaults() {
    let tmp = setup_project();
    // Write a customized rubric, then reset.
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(
        tmp.path().join("config/test_case_rules.json"),
        r#"{"title_max_length":99,"max_steps":3,"priority_ratios":{"P0":{"min":0,"max":100}},"version":"2.0"}"#,
    )
    .unwrap();

    let (value, _) = run_ilens(tmp.path(), &["rubric", "show"]);
    assert_eq!(value["rubric"]["title_max_length"], 99);

    let (value, ok) = run_ilens(tmp.path(), &["rubric", "reset"]);
    assert!(ok);
    assert_eq!(value["rubric"]["title_max_length"], 40);

    let (value, _) = run_ilens(tmp.path(), &["rubric", "show"]);
    assert_eq!(value["rubric"]["title_max_length"], 40);
}
