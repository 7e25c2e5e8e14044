use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::config::DataConfig;
use crate::error::{ForecastError, Result};
use crate::match_record::{Fixture, MatchKey, MatchOdds, MatchRecord, TeamId};
use crate::parquet_io;

const COL_DATE: &str = "date";
const COL_HOME: &str = "home_team";
const COL_AWAY: &str = "away_team";
const COL_HOME_GOALS: &str = "home_goals";
const COL_AWAY_GOALS: &str = "away_goals";
const COL_STATUS: &str = "status";
const COL_ODDS: [&str; 3] = ["odds_home", "odds_draw", "odds_away"];

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("match_date", COL_DATE),
    ("kickoff", COL_DATE),
    ("home", COL_HOME),
    ("away", COL_AWAY),
    ("home_score", COL_HOME_GOALS),
    ("away_score", COL_AWAY_GOALS),
    ("fthg", COL_HOME_GOALS),
    ("ftag", COL_AWAY_GOALS),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSource {
    Csv(PathBuf),
    Parquet(PathBuf),
}

impl MatchSource {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(Self::Csv(path.to_path_buf())),
            Some("parquet") | Some("pq") => Ok(Self::Parquet(path.to_path_buf())),
            _ => Err(ForecastError::Config(format!(
                "unsupported source format: {}",
                path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Csv(p) | Self::Parquet(p) => p,
        }
    }
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    pub matches: Vec<MatchRecord>,
    pub fixtures: Vec<Fixture>,
    /// Keys whose latest copy carries a drop status (postponed, cancelled).
    pub dropped: Vec<MatchKey>,
    pub rows_read: usize,
    pub duplicates: usize,
    pub dropped_rows: usize,
    pub invalid_odds: usize,
}

pub fn load_matches(source: &MatchSource, cfg: &DataConfig) -> Result<Vec<MatchRecord>> {
    Ok(load_source(source, cfg)?.matches)
}

pub fn load_source(source: &MatchSource, cfg: &DataConfig) -> Result<IngestBatch> {
    let (headers, rows) = match source {
        MatchSource::Csv(path) => {
            let file = std::fs::File::open(path).map_err(|e| ForecastError::io(path, e))?;
            read_csv(file, cfg)?
        }
        MatchSource::Parquet(path) => read_parquet(path)?,
    };
    let batch = parse_rows(&headers, &rows, cfg)?;
    info!(
        source = %source,
        rows = batch.rows_read,
        matches = batch.matches.len(),
        fixtures = batch.fixtures.len(),
        "loaded match source"
    );
    Ok(batch)
}

pub fn load_csv_reader<R: Read>(reader: R, cfg: &DataConfig) -> Result<IngestBatch> {
    let (headers, rows) = read_csv(reader, cfg)?;
    parse_rows(&headers, &rows, cfg)
}

fn read_csv<R: Read>(reader: R, cfg: &DataConfig) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| malformed_csv(e, 0, "header".to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let cols = resolve_columns(&headers, cfg)?;

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    loop {
        let row_no = rows.len() + 1;
        match rdr.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(malformed_csv(e, row_no, format!("row {row_no}"))),
        }
        let mut fields = Vec::with_capacity(record.len());
        for (i, raw) in record.iter().enumerate() {
            let Ok(value) = std::str::from_utf8(raw) else {
                let lossy = |i: usize| {
                    record
                        .get(i)
                        .map(|b| String::from_utf8_lossy(b).trim().to_string())
                        .unwrap_or_default()
                };
                return Err(ForecastError::DataValidation {
                    row: row_no,
                    identity: format!(
                        "{} {} vs {}",
                        or_placeholder(&lossy(cols.date)),
                        or_placeholder(&lossy(cols.home)),
                        or_placeholder(&lossy(cols.away))
                    ),
                    reason: format!(
                        "column {:?} is not valid UTF-8",
                        headers.get(i).map(String::as_str).unwrap_or("?")
                    ),
                });
            };
            fields.push(value.trim().to_string());
        }
        rows.push(fields);
    }
    Ok((headers, rows))
}

fn malformed_csv(err: csv::Error, row: usize, identity: String) -> ForecastError {
    let bad_record = matches!(
        err.kind(),
        csv::ErrorKind::Utf8 { .. }
            | csv::ErrorKind::UnequalLengths { .. }
            | csv::ErrorKind::Deserialize { .. }
    );
    if bad_record {
        ForecastError::DataValidation {
            row,
            identity,
            reason: err.to_string(),
        }
    } else {
        ForecastError::Csv(err)
    }
}

fn read_parquet(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let table = parquet_io::read_table(path)?;
    let headers = table.columns.iter().map(|c| c.name.clone()).collect();
    let rows = (0..table.num_rows())
        .map(|row| {
            table
                .columns
                .iter()
                .map(|c| c.data.cell_string(row))
                .collect()
        })
        .collect();
    Ok((headers, rows))
}

struct ColumnIndex {
    date: usize,
    home: usize,
    away: usize,
    home_goals: usize,
    away_goals: usize,
    status: Option<usize>,
    odds: Option<[usize; 3]>,
}

fn canonical_name(raw: &str, cfg: &DataConfig) -> String {
    let trimmed = raw.trim();
    if let Some(mapped) = cfg.column_mapping.get(trimmed) {
        return mapped.clone();
    }
    let lower = trimmed.to_ascii_lowercase();
    if let Some((_, mapped)) = cfg
        .column_mapping
        .iter()
        .find(|(from, _)| from.to_ascii_lowercase() == lower)
    {
        return mapped.clone();
    }
    BUILTIN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lower)
}

fn resolve_columns(headers: &[String], cfg: &DataConfig) -> Result<ColumnIndex> {
    let names: Vec<String> = headers.iter().map(|h| canonical_name(h, cfg)).collect();
    let find = |name: &str| names.iter().position(|n| n == name);
    let require = |name: &str| {
        find(name).ok_or_else(|| ForecastError::DataValidation {
            row: 0,
            identity: "header".to_string(),
            reason: format!("required column {name:?} is missing (found {names:?})"),
        })
    };

    let odds = match (find(COL_ODDS[0]), find(COL_ODDS[1]), find(COL_ODDS[2])) {
        (Some(h), Some(d), Some(a)) => Some([h, d, a]),
        _ => None,
    };

    Ok(ColumnIndex {
        date: require(COL_DATE)?,
        home: require(COL_HOME)?,
        away: require(COL_AWAY)?,
        home_goals: require(COL_HOME_GOALS)?,
        away_goals: require(COL_AWAY_GOALS)?,
        status: find(COL_STATUS),
        odds,
    })
}

enum RowKind {
    Finished,
    Upcoming,
    Dropped,
}

fn classify_status(status: &str, has_scores: bool, cfg: &DataConfig) -> Option<RowKind> {
    let status = status.trim().to_ascii_lowercase();
    if status.is_empty() {
        return Some(if has_scores {
            RowKind::Finished
        } else {
            RowKind::Upcoming
        });
    }
    let listed = |list: &[String]| list.iter().any(|s| s.eq_ignore_ascii_case(&status));
    if listed(&cfg.drop_statuses) {
        Some(RowKind::Dropped)
    } else if listed(&cfg.upcoming_statuses) {
        Some(RowKind::Upcoming)
    } else if listed(&cfg.finished_statuses) {
        Some(RowKind::Finished)
    } else {
        None
    }
}

pub(crate) fn parse_rows(
    headers: &[String],
    rows: &[Vec<String>],
    cfg: &DataConfig,
) -> Result<IngestBatch> {
    let cols = resolve_columns(headers, cfg)?;
    let mut matches: BTreeMap<MatchKey, MatchRecord> = BTreeMap::new();
    let mut fixtures: BTreeMap<MatchKey, Fixture> = BTreeMap::new();
    let mut dropped: BTreeSet<MatchKey> = BTreeSet::new();
    let mut batch = IngestBatch {
        rows_read: rows.len(),
        ..IngestBatch::default()
    };

    for (idx, row) in rows.iter().enumerate() {
        let row_no = idx + 1;
        let cell = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");
        let identity = format!(
            "{} {} vs {}",
            or_placeholder(cell(cols.date)),
            or_placeholder(cell(cols.home)),
            or_placeholder(cell(cols.away))
        );
        let invalid = |reason: String| ForecastError::DataValidation {
            row: row_no,
            identity: identity.clone(),
            reason,
        };

        let home_raw = cell(cols.home_goals);
        let away_raw = cell(cols.away_goals);
        let has_scores = !home_raw.is_empty() || !away_raw.is_empty();
        let status = cols.status.map(cell).unwrap_or("");
        let kind = classify_status(status, has_scores, cfg)
            .ok_or_else(|| invalid(format!("unrecognised status {status:?}")))?;
        if matches!(kind, RowKind::Dropped) {
            debug!(row = row_no, status, "row dropped by status");
            batch.dropped_rows += 1;
            if let (Some(home), Some(away), Some(date)) = (
                TeamId::parse(cell(cols.home)),
                TeamId::parse(cell(cols.away)),
                parse_date(cell(cols.date), &cfg.date_formats),
            ) {
                let key = MatchKey { date, home, away };
                fixtures.remove(&key);
                dropped.insert(key);
            }
            continue;
        }

        let home = TeamId::parse(cell(cols.home))
            .ok_or_else(|| invalid("home team identifier is empty".to_string()))?;
        let away = TeamId::parse(cell(cols.away))
            .ok_or_else(|| invalid("away team identifier is empty".to_string()))?;
        if home == away {
            return Err(invalid("home and away team are identical".to_string()));
        }
        let date = parse_date(cell(cols.date), &cfg.date_formats)
            .ok_or_else(|| invalid(format!("unparseable date {:?}", cell(cols.date))))?;

        let odds = match cols.odds {
            Some(idx) => {
                let raw = idx.map(cell);
                if raw.iter().all(|v| v.is_empty()) {
                    None
                } else {
                    let parsed = parse_odds(raw);
                    if parsed.is_none() {
                        batch.invalid_odds += 1;
                    }
                    parsed
                }
            }
            None => None,
        };

        match kind {
            RowKind::Finished => {
                let home_goals = parse_score(home_raw)
                    .ok_or_else(|| invalid(format!("invalid home score {home_raw:?}")))?;
                let away_goals = parse_score(away_raw)
                    .ok_or_else(|| invalid(format!("invalid away score {away_raw:?}")))?;
                let record = MatchRecord {
                    date,
                    home,
                    away,
                    home_goals,
                    away_goals,
                    odds,
                };
                dropped.remove(&record.key());
                if matches.insert(record.key(), record).is_some() {
                    batch.duplicates += 1;
                }
            }
            RowKind::Upcoming => {
                let fixture = Fixture {
                    date,
                    home,
                    away,
                    odds,
                };
                dropped.remove(&fixture.key());
                if fixtures.insert(fixture.key(), fixture).is_some() {
                    batch.duplicates += 1;
                }
            }
            RowKind::Dropped => {}
        }
    }

    fixtures.retain(|key, _| !matches.contains_key(key));

    if batch.duplicates > 0 {
        warn!(
            duplicates = batch.duplicates,
            "duplicate records replaced by their latest copy"
        );
    }
    if batch.invalid_odds > 0 {
        warn!(
            rows = batch.invalid_odds,
            "invalid odds ignored (must be decimal odds above 1.0)"
        );
    }

    batch.matches = matches.into_values().collect();
    batch.fixtures = fixtures.into_values().collect();
    batch.dropped = dropped.into_iter().collect();
    Ok(batch)
}

fn or_placeholder(raw: &str) -> &str {
    if raw.is_empty() { "?" } else { raw }
}

/// Non-negative integer score; `"2.0"` is accepted, `"2.5"` is not.
pub fn parse_score(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u16>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= f64::from(u16::MAX) {
        Some(v as u16)
    } else {
        None
    }
}

pub fn parse_date(raw: &str, formats: &[String]) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in formats {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.date_naive())
}

fn parse_odds(raw: [&str; 3]) -> Option<MatchOdds> {
    let home = raw[0].parse::<f64>().ok()?;
    let draw = raw[1].parse::<f64>().ok()?;
    let away = raw[2].parse::<f64>().ok()?;
    MatchOdds::new(home, draw, away)
}
