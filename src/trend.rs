//! Time-trend aggregation and chart rendering.
//!
//! Records are grouped by calendar date on a chosen time field; per-date
//! aggregates count totals, completion/new transitions (inferred from the
//! status label in either script), coarse priority buckets, and raw status
//! labels. A PNG line chart is rendered per request into
//! `local_data/time_trend/<kind>_<chart>_<timestamp>.png`.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use plotters::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Paths;
use crate::error::OpError;
use crate::models::{DailyAggregate, IssueDataset, IssueKind, IssueRecord};

/// What the chart plots per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Count,
    Priority,
    Status,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Count => "count",
            ChartKind::Priority => "priority",
            ChartKind::Status => "status",
        }
    }
}

impl std::str::FromStr for ChartKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(ChartKind::Count),
            "priority" => Ok(ChartKind::Priority),
            "status" => Ok(ChartKind::Status),
            other => anyhow::bail!("Unknown chart kind: {}. Use count, priority, or status.", other),
        }
    }
}

/// Which record timestamp drives the grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    Created,
    Modified,
    Begin,
    Due,
}

impl TimeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeField::Created => "created",
            TimeField::Modified => "modified",
            TimeField::Begin => "begin",
            TimeField::Due => "due",
        }
    }
}

impl std::str::FromStr for TimeField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(TimeField::Created),
            "modified" => Ok(TimeField::Modified),
            "begin" => Ok(TimeField::Begin),
            "due" => Ok(TimeField::Due),
            other => anyhow::bail!(
                "Unknown time field: {}. Use created, modified, begin, or due.",
                other
            ),
        }
    }
}

const COMPLETED_TOKENS: &[&str] = &["closed", "resolved", "done", "完成", "已解决", "已关闭"];
const NEW_TOKENS: &[&str] = &["new", "open", "创建", "新建"];
const HIGH_TOKENS: &[&str] = &["high", "紧急", "1"];
const MEDIUM_TOKENS: &[&str] = &["medium", "中", "2"];
const LOW_TOKENS: &[&str] = &["low", "低", "3"];

/// Maximum status series drawn on a status chart.
const MAX_STATUS_SERIES: usize = 7;
/// Up to this many dates every tick is labeled; beyond it labels thin out.
const DENSE_LABEL_LIMIT: usize = 30;

/// Parse the tracker time format `YYYY-MM-DD[ HH:MM:SS]`.
pub fn parse_issue_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.split(' ').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Group records by calendar date. Records whose time field is empty or
/// unparseable are dropped; everything else contributes to exactly one day.
pub fn aggregate_daily(
    records: &[IssueRecord],
    field: TimeField,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
) -> BTreeMap<NaiveDate, DailyAggregate> {
    let mut days: BTreeMap<NaiveDate, DailyAggregate> = BTreeMap::new();

    for record in records {
        let raw = record.time_field(field.as_str());
        let Some(date) = parse_issue_date(raw) else {
            continue;
        };
        if since.is_some_and(|s| date < s) || until.is_some_and(|u| date > u) {
            continue;
        }

        let day = days.entry(date).or_insert_with(|| DailyAggregate {
            date: date.format("%Y-%m-%d").to_string(),
            ..Default::default()
        });
        day.total += 1;

        let priority = record.priority.to_lowercase();
        if !priority.is_empty() {
            if HIGH_TOKENS.iter().any(|t| priority.contains(t)) {
                day.high_priority += 1;
            } else if MEDIUM_TOKENS.iter().any(|t| priority.contains(t)) {
                day.medium_priority += 1;
            } else if LOW_TOKENS.iter().any(|t| priority.contains(t)) {
                day.low_priority += 1;
            }
        }

        if !record.status.is_empty() {
            *day.status_counts.entry(record.status.clone()).or_insert(0) += 1;
            let status = record.status.to_lowercase();
            if COMPLETED_TOKENS.iter().any(|t| status.contains(t)) {
                day.completed += 1;
            }
            if NEW_TOKENS.iter().any(|t| status.contains(t)) {
                day.new_count += 1;
            }
        }
    }
    days
}

/// Result of `ilens trend`.
#[derive(Debug, Serialize)]
pub struct TrendReport {
    pub status: &'static str,
    pub data_type: IssueKind,
    pub chart_type: String,
    pub time_field: String,
    pub time_range: String,
    pub total_count: u64,
    pub days_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_end: Option<String>,
    pub daily_stats: BTreeMap<String, DailyAggregate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_url: Option<String>,
    pub generated_at: String,
}

/// Aggregate one kind of record over time and render the chart.
#[allow(clippy::too_many_arguments)]
pub fn run_trend(
    paths: &Paths,
    dataset: &IssueDataset,
    kind: IssueKind,
    chart: ChartKind,
    field: TimeField,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
) -> Result<TrendReport, OpError> {
    let records = dataset.records_of(kind);
    let days = aggregate_daily(records, field, since, until);

    let time_range = match (since, until) {
        (Some(s), Some(u)) => format!("{} to {}", s, u),
        (Some(s), None) => format!("from {}", s),
        (None, Some(u)) => format!("until {}", u),
        (None, None) => "all time".to_string(),
    };

    let total_count: u64 = days.values().map(|d| d.total).sum();
    let generated_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let (chart_path, chart_url) = if days.is_empty() {
        (None, None)
    } else {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{}_{}_{}.png", kind.as_str(), chart.as_str(), timestamp);
        let path = paths.time_trend_dir().join(filename);
        render_chart(&path, &days, kind, chart, field, &time_range)
            .context("Chart rendering failed")?;
        let url = format!("file://{}", path.display().to_string().replace('\\', "/"));
        (Some(path.display().to_string()), Some(url))
    };

    Ok(TrendReport {
        status: "success",
        data_type: kind,
        chart_type: chart.as_str().to_string(),
        time_field: field.as_str().to_string(),
        time_range,
        total_count,
        days_count: days.len(),
        date_start: days.keys().next().map(|d| d.to_string()),
        date_end: days.keys().last().map(|d| d.to_string()),
        daily_stats: days
            .into_iter()
            .map(|(date, agg)| (date.to_string(), agg))
            .collect(),
        chart_path,
        chart_url,
        generated_at,
    })
}

/// One named line on the chart.
struct Series {
    name: String,
    color: RGBColor,
    values: Vec<u64>,
}

static FONT_READY: std::sync::OnceLock<bool> = std::sync::OnceLock::new();

/// Register a system font with the pure-Rust text backend. Charts degrade
/// to unlabeled line plots on hosts without any of the known font files.
fn fonts_available() -> bool {
    *FONT_READY.get_or_init(|| {
        const CANDIDATES: &[&str] = &[
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/usr/share/fonts/dejavu/DejaVuSans.ttf",
            "/System/Library/Fonts/Supplemental/Arial.ttf",
            "C:\\Windows\\Fonts\\arial.ttf",
        ];
        for path in CANDIDATES {
            if let Ok(bytes) = std::fs::read(path) {
                let leaked: &'static [u8] = Box::leak(bytes.into_boxed_slice());
                if plotters::style::register_font(
                    "sans-serif",
                    plotters::style::FontStyle::Normal,
                    leaked,
                )
                .is_ok()
                {
                    tracing::debug!(path, "registered chart font");
                    return true;
                }
            }
        }
        tracing::warn!("no usable system font; charts will have no text labels");
        false
    })
}

fn render_chart(
    path: &Path,
    days: &BTreeMap<NaiveDate, DailyAggregate>,
    kind: IssueKind,
    chart: ChartKind,
    field: TimeField,
    time_range: &str,
) -> Result<()> {
    let dates: Vec<NaiveDate> = days.keys().copied().collect();
    let labels: Vec<String> = dates.iter().map(|d| d.format("%m-%d").to_string()).collect();

    let series = match chart {
        ChartKind::Count => vec![Series {
            name: "total".to_string(),
            color: BLUE,
            values: days.values().map(|d| d.total).collect(),
        }],
        ChartKind::Priority => vec![
            Series {
                name: "high".to_string(),
                color: RED,
                values: days.values().map(|d| d.high_priority).collect(),
            },
            Series {
                name: "medium".to_string(),
                color: RGBColor(255, 165, 0),
                values: days.values().map(|d| d.medium_priority).collect(),
            },
            Series {
                name: "low".to_string(),
                color: GREEN,
                values: days.values().map(|d| d.low_priority).collect(),
            },
        ],
        ChartKind::Status => top_status_series(days),
    };

    let y_max = series
        .iter()
        .flat_map(|s| s.values.iter())
        .copied()
        .max()
        .unwrap_or(0)
        .max(1) as f64;

    let with_text = fonts_available();

    let root = BitMapBackend::new(path, (1200, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| anyhow::anyhow!("{}", e))?;

    let title = format!(
        "{} {} trend by {} ({})",
        kind.as_str(),
        chart.as_str(),
        field.as_str(),
        time_range
    );
    let x_max = (dates.len().saturating_sub(1)).max(1) as f64;
    let label_count = if dates.len() <= DENSE_LABEL_LIMIT {
        dates.len().max(2)
    } else {
        // Auto-thinning for dense ranges.
        12
    };

    let mut builder = ChartBuilder::on(&root);
    builder.margin(20);
    if with_text {
        builder
            .caption(&title, ("sans-serif", 24))
            .x_label_area_size(50)
            .y_label_area_size(50);
    }
    let mut ctx = builder
        .build_cartesian_2d(0f64..x_max, 0f64..(y_max * 1.1 + 1.0))
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if with_text {
        ctx.configure_mesh()
            .x_labels(label_count)
            .x_label_formatter(&|x| {
                let idx = x.round() as usize;
                labels.get(idx).cloned().unwrap_or_default()
            })
            .y_desc("count")
            .draw()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
    }

    for s in &series {
        let color = s.color;
        let points: Vec<(f64, f64)> = s
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f64, *v as f64))
            .collect();
        let drawn = ctx
            .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        if with_text {
            drawn
                .label(s.name.clone())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 18, y)], color));
        }
        ctx.draw_series(
            points
                .iter()
                .map(|(x, y)| Circle::new((*x, *y), 3, color.filled())),
        )
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    }

    if with_text {
        ctx.configure_series_labels()
            .border_style(BLACK)
            .background_style(WHITE.mix(0.8))
            .draw()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
    }
    root.present().map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(())
}

/// The most frequent statuses across the range, one palette color each.
fn top_status_series(days: &BTreeMap<NaiveDate, DailyAggregate>) -> Vec<Series> {
    let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
    for day in days.values() {
        for (status, count) in &day.status_counts {
            *totals.entry(status.as_str()).or_insert(0) += *count;
        }
    }
    let mut ranked: Vec<(&str, u64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(MAX_STATUS_SERIES);

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, (status, _))| {
            let rgba = Palette99::pick(i).to_rgba();
            Series {
                name: status.to_string(),
                color: RGBColor(rgba.0, rgba.1, rgba.2),
                values: days
                    .values()
                    .map(|d| d.status_counts.get(status).copied().unwrap_or(0))
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(created: &str, status: &str, priority: &str) -> IssueRecord {
        IssueRecord {
            id: "x".to_string(),
            created: created.to_string(),
            status: status.to_string(),
            priority: priority.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_daily_grouping_matches_expected() {
        let records = vec![
            record("2025-01-01 08:00:00", "新", "high"),
            record("2025-01-01 19:30:00", "已关闭", "medium"),
            record("2025-01-02", "新建", "low"),
        ];
        let days = aggregate_daily(&records, TimeField::Created, None, None);
        assert_eq!(days.len(), 2);

        let d1 = &days[&NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()];
        assert_eq!(d1.total, 2);
        assert_eq!(d1.completed, 1);
        assert_eq!(d1.high_priority, 1);
        assert_eq!(d1.medium_priority, 1);

        let d2 = &days[&NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()];
        assert_eq!(d2.total, 1);
        assert_eq!(d2.new_count, 1);
        assert_eq!(d2.low_priority, 1);
    }

    #[test]
    fn test_unparseable_times_dropped_exactly() {
        let records = vec![
            record("2025-01-01", "新", "high"),
            record("", "新", "high"),
            record("not-a-date", "新", "high"),
            record("2025-13-45", "新", "high"),
        ];
        let days = aggregate_daily(&records, TimeField::Created, None, None);
        let kept: u64 = days.values().map(|d| d.total).sum();
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_inclusive_date_range() {
        let records = vec![
            record("2025-01-01", "", ""),
            record("2025-01-02", "", ""),
            record("2025-01-03", "", ""),
        ];
        let since = NaiveDate::from_ymd_opt(2025, 1, 1);
        let until = NaiveDate::from_ymd_opt(2025, 1, 2);
        let days = aggregate_daily(&records, TimeField::Created, since, until);
        assert_eq!(days.len(), 2);
        let total: u64 = days.values().map(|d| d.total).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_status_counts_accumulate() {
        let records = vec![
            record("2025-01-01", "开发中", ""),
            record("2025-01-01", "开发中", ""),
            record("2025-01-01", "已解决", ""),
        ];
        let days = aggregate_daily(&records, TimeField::Created, None, None);
        let day = days.values().next().unwrap();
        assert_eq!(day.status_counts["开发中"], 2);
        assert_eq!(day.status_counts["已解决"], 1);
        assert_eq!(day.completed, 1);
    }

    #[test]
    fn test_begin_field_used_for_stories() {
        let mut r = record("2025-01-01", "", "");
        r.begin = "2025-03-05".to_string();
        let days = aggregate_daily(&[r], TimeField::Begin, None, None);
        assert!(days.contains_key(&NaiveDate::from_ymd_opt(2025, 3, 5).unwrap()));
    }

    #[test]
    fn test_top_status_series_capped_and_ordered() {
        let mut records = Vec::new();
        for i in 0..10 {
            for _ in 0..(10 - i) {
                records.push(record("2025-01-01", &format!("status{}", i), ""));
            }
        }
        let days = aggregate_daily(&records, TimeField::Created, None, None);
        let series = top_status_series(&days);
        assert_eq!(series.len(), MAX_STATUS_SERIES);
        assert_eq!(series[0].name, "status0");
    }
}
