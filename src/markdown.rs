//! Reusable Markdown pipe-table parser.
//!
//! LLM replies carry per-case evaluations as GitHub-style pipe tables.
//! This parser is intentionally tolerant: a table is any run of `|`-prefixed
//! lines with a header row, an optional `---` separator row, and data rows.
//! Cells are trimmed; surrounding empty cells from leading/trailing pipes
//! are dropped.

/// One parsed table: a header row plus zero or more data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Extract every pipe table from `text`, in document order.
pub fn parse_tables(text: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut current: Option<Table> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if is_table_line(trimmed) {
            let cells = split_row(trimmed);
            if is_separator_row(&cells) {
                continue;
            }
            match current.as_mut() {
                None => {
                    current = Some(Table {
                        headers: cells,
                        rows: Vec::new(),
                    });
                }
                Some(table) => table.rows.push(cells),
            }
        } else if let Some(table) = current.take() {
            tables.push(table);
        }
    }
    if let Some(table) = current {
        tables.push(table);
    }
    tables
}

fn is_table_line(line: &str) -> bool {
    line.starts_with('|') && line.len() > 1
}

/// Split a `| a | b | c |` row into trimmed cells.
fn split_row(line: &str) -> Vec<String> {
    let stripped = line.strip_prefix('|').unwrap_or(line);
    let inner = stripped.strip_suffix('|').unwrap_or(stripped);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// A row like `| --- | :---: | --- |`.
fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|cell| {
            !cell.is_empty()
                && cell
                    .chars()
                    .all(|c| c == '-' || c == ':' || c.is_whitespace())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_table() {
        let text = "\
preamble text

| 内容 | 评分(0-10) | 建议 |
| --- | --- | --- |
| 用例标题 登录成功 | 8 | 改为更具体的标题 |
| 前置条件 已注册账号 | 7 | - |

trailing text";
        let tables = parse_tables(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].headers, vec!["内容", "评分(0-10)", "建议"]);
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[0][1], "8");
        assert_eq!(tables[0].rows[1][2], "-");
    }

    #[test]
    fn test_multiple_tables_split_by_blank_line() {
        let text = "\
| a | b |
| --- | --- |
| 1 | 2 |

| c | d |
| --- | --- |
| 3 | 4 |
| 5 | 6 |";
        let tables = parse_tables(text);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].rows.len(), 1);
        assert_eq!(tables[1].rows.len(), 2);
        assert_eq!(tables[1].rows[1], vec!["5", "6"]);
    }

    #[test]
    fn test_no_table_returns_empty() {
        assert!(parse_tables("just prose, no pipes here").is_empty());
    }

    #[test]
    fn test_separator_variants_skipped() {
        let text = "| h1 | h2 |\n|:---|---:|\n| x | y |";
        let tables = parse_tables(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows, vec![vec!["x".to_string(), "y".to_string()]]);
    }

    #[test]
    fn test_table_at_end_of_text() {
        let text = "| h |\n| - |\n| v |";
        let tables = parse_tables(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows[0][0], "v");
    }
}
