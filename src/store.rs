//! Flat-file store: JSON blobs, the issue dataset, and spreadsheet import.
//!
//! All persistent state goes through this module. JSON is written
//! pretty-printed in UTF-8 with non-ASCII characters preserved literally,
//! so datasets containing CJK text stay readable on disk.

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Reader};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::config::{Paths, DEFAULT_DATA_FILE};
use crate::error::OpError;
use crate::models::IssueDataset;

/// Load a JSON object from disk.
///
/// A missing file yields an empty mapping; a file that exists but fails to
/// parse is an error.
pub fn load_json(path: &Path) -> Result<serde_json::Map<String, Value>> {
    if !path.exists() {
        return Ok(serde_json::Map::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Malformed JSON in {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("Expected a JSON object in {}", path.display()),
    }
}

/// Serialize a value as pretty-printed JSON, creating parent directories.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    std::fs::write(path, body).with_context(|| format!("Failed to write: {}", path.display()))?;
    Ok(())
}

/// Load the canonical issue dataset.
///
/// `file` may be absolute or project-relative (resolved via [`Paths`]);
/// `None` uses the default dataset file.
pub fn load_dataset(paths: &Paths, file: Option<&str>) -> Result<IssueDataset, OpError> {
    let path = paths.data_file_path(file.unwrap_or(DEFAULT_DATA_FILE));
    if !path.exists() {
        return Err(OpError::InputMissing(format!(
            "issue dataset not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| OpError::InputMalformed(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content).map_err(|e| {
        OpError::InputMalformed(format!("malformed dataset {}: {}", path.display(), e))
    })
}

/// Read a tabular spreadsheet (`.xlsx` or `.csv`) with column remapping.
///
/// `mapping` is `(source column → target field)`. Missing cells become
/// empty strings; rows whose mapped fields are all empty are dropped;
/// unmapped columns are ignored.
pub fn read_spreadsheet(
    path: &Path,
    mapping: &[(&str, &str)],
) -> Result<Vec<serde_json::Map<String, Value>>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let (headers, rows) = match ext.as_str() {
        "csv" => read_csv(path)?,
        _ => read_xlsx(path)?,
    };
    Ok(remap_rows(&headers, &rows, mapping))
}

fn read_xlsx(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open spreadsheet: {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow::anyhow!("Spreadsheet has no sheets: {}", path.display()))?
        .with_context(|| format!("Failed to read sheet 0 of {}", path.display()))?;

    let mut rows_iter = range.rows();
    let headers = rows_iter
        .next()
        .map(|r| r.iter().map(|c| c.to_string().trim().to_string()).collect())
        .unwrap_or_default();
    let rows = rows_iter
        .map(|r| r.iter().map(|c| c.to_string().trim().to_string()).collect())
        .collect();
    Ok((headers, rows))
}

fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV: {}", path.display()))?;
    let headers = reader
        .headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read CSV row")?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect());
    }
    Ok((headers, rows))
}

fn remap_rows(
    headers: &[String],
    rows: &[Vec<String>],
    mapping: &[(&str, &str)],
) -> Vec<serde_json::Map<String, Value>> {
    // Resolve each source column to its position once.
    let columns: Vec<(Option<usize>, &str)> = mapping
        .iter()
        .map(|(src, dst)| (headers.iter().position(|h| h.as_str() == *src), *dst))
        .collect();

    let mut records = Vec::new();
    for row in rows {
        let mut record = serde_json::Map::new();
        let mut any_value = false;
        for (position, target) in &columns {
            let cell = position
                .and_then(|i| row.get(i))
                .map(|s| s.as_str())
                .unwrap_or("");
            if !cell.is_empty() {
                any_value = true;
            }
            record.insert(target.to_string(), Value::String(cell.to_string()));
        }
        if any_value {
            records.push(record);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_json_missing_is_empty() {
        let tmp = TempDir::new().unwrap();
        let map = load_json(&tmp.path().join("nope.json")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_load_json_malformed_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_json(&path).is_err());
    }

    #[test]
    fn test_save_load_round_trip_preserves_order_and_unicode() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub/dir/data.json");
        let original: Value =
            serde_json::from_str(r#"{"zeta":"订单","alpha":1,"nested":{"b":2,"a":1}}"#).unwrap();
        save_json(&path, &original).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        // Non-ASCII is kept literal, not \u-escaped.
        assert!(written.contains("订单"));

        let reloaded = load_json(&path).unwrap();
        save_json(&path, &Value::Object(reloaded)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), written);
    }

    #[test]
    fn test_load_dataset_missing() {
        let tmp = TempDir::new().unwrap();
        let paths = Paths::at(tmp.path()).unwrap();
        let err = load_dataset(&paths, None).unwrap_err();
        assert_eq!(err.kind(), "input_missing");
    }

    #[test]
    fn test_csv_remap_drops_empty_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cases.csv");
        std::fs::write(
            &path,
            "用例ID,用例标题,多余列\n1001,登录成功,x\n,,y\n1002,,z\n",
        )
        .unwrap();

        let records =
            read_spreadsheet(&path, &[("用例ID", "id"), ("用例标题", "title")]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], "1001");
        assert_eq!(records[0]["title"], "登录成功");
        assert_eq!(records[1]["id"], "1002");
        assert_eq!(records[1]["title"], "");
        assert!(records[0].get("多余列").is_none());
    }

    #[test]
    fn test_missing_source_column_becomes_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cases.csv");
        std::fs::write(&path, "用例ID\n1001\n").unwrap();
        let records =
            read_spreadsheet(&path, &[("用例ID", "id"), ("等级", "priority")]).unwrap();
        assert_eq!(records[0]["priority"], "");
    }
}
