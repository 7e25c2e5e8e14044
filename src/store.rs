use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, params};

use crate::ingest::IngestBatch;
use tracing::info;

use crate::match_record::{Fixture, MatchKey, MatchOdds, MatchRecord, TeamId};

#[derive(Debug, Clone)]
pub struct StoreSummary {
    pub run_id: i64,
    pub matches_upserted: usize,
    pub fixtures_upserted: usize,
    pub fixtures_resolved: usize,
    pub total_matches: usize,
    pub latest_match_date: Option<String>,
}

pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store dir {}", parent.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            match_date TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NOT NULL,
            away_goals INTEGER NOT NULL,
            odds_home REAL NULL,
            odds_draw REAL NULL,
            odds_away REAL NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (match_date, home_team, away_team)
        );
        CREATE INDEX IF NOT EXISTS idx_matches_home ON matches(home_team);
        CREATE INDEX IF NOT EXISTS idx_matches_away ON matches(away_team);

        CREATE TABLE IF NOT EXISTS fixtures (
            match_date TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            odds_home REAL NULL,
            odds_draw REAL NULL,
            odds_away REAL NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (match_date, home_team, away_team)
        );

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            source TEXT NOT NULL,
            rows_read INTEGER NOT NULL,
            matches_upserted INTEGER NOT NULL,
            fixtures_upserted INTEGER NOT NULL,
            duplicates INTEGER NOT NULL,
            dropped_rows INTEGER NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Writes a validated batch in one transaction. The latest copy of a key wins
/// across tables: a result clears its fixture, a fixture clears its stored
/// result, and a dropped key leaves `fixtures`.
pub fn upsert_batch(conn: &mut Connection, source: &str, batch: &IngestBatch) -> Result<StoreSummary> {
    let started_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO ingest_runs(started_at, finished_at, source, rows_read, matches_upserted, fixtures_upserted, duplicates, dropped_rows)
         VALUES (?1, NULL, ?2, ?3, 0, 0, ?4, ?5)",
        params![
            started_at,
            source,
            batch.rows_read as i64,
            batch.duplicates as i64,
            batch.dropped_rows as i64
        ],
    )
    .context("insert ingest run")?;
    let run_id = conn.last_insert_rowid();

    let mut fixtures_resolved = 0usize;
    let tx = conn.transaction().context("begin ingest transaction")?;
    for m in &batch.matches {
        upsert_match(&tx, m)?;
        fixtures_resolved += delete_key(&tx, "fixtures", &m.key())?;
    }
    for f in &batch.fixtures {
        delete_key(&tx, "matches", &f.key())?;
        upsert_fixture(&tx, f)?;
    }
    let mut fixtures_withdrawn = 0usize;
    for key in &batch.dropped {
        fixtures_withdrawn += delete_key(&tx, "fixtures", key)?;
    }
    if fixtures_withdrawn > 0 {
        info!(source, fixtures_withdrawn, "fixtures withdrawn by drop status");
    }
    tx.commit().context("commit ingest transaction")?;

    conn.execute(
        "UPDATE ingest_runs
         SET finished_at = ?1, matches_upserted = ?2, fixtures_upserted = ?3
         WHERE run_id = ?4",
        params![
            Utc::now().to_rfc3339(),
            batch.matches.len() as i64,
            batch.fixtures.len() as i64,
            run_id
        ],
    )
    .context("update ingest run")?;

    let (total_matches, latest_match_date) = conn
        .query_row(
            "SELECT COUNT(*), MAX(match_date) FROM matches",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .context("query store totals")?;

    Ok(StoreSummary {
        run_id,
        matches_upserted: batch.matches.len(),
        fixtures_upserted: batch.fixtures.len(),
        fixtures_resolved,
        total_matches: usize::try_from(total_matches).unwrap_or(0),
        latest_match_date,
    })
}

fn delete_key(tx: &rusqlite::Transaction<'_>, table: &str, key: &MatchKey) -> Result<usize> {
    tx.execute(
        &format!("DELETE FROM {table} WHERE match_date = ?1 AND home_team = ?2 AND away_team = ?3"),
        params![key.date.to_string(), key.home.as_str(), key.away.as_str()],
    )
    .with_context(|| format!("delete {key} from {table}"))
}

fn upsert_match(tx: &rusqlite::Transaction<'_>, m: &MatchRecord) -> Result<()> {
    let (oh, od, oa) = odds_columns(m.odds);
    tx.execute(
        r#"
        INSERT INTO matches (
            match_date, home_team, away_team, home_goals, away_goals,
            odds_home, odds_draw, odds_away, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(match_date, home_team, away_team) DO UPDATE SET
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            odds_home = excluded.odds_home,
            odds_draw = excluded.odds_draw,
            odds_away = excluded.odds_away,
            updated_at = excluded.updated_at
        "#,
        params![
            m.date.to_string(),
            m.home.as_str(),
            m.away.as_str(),
            i64::from(m.home_goals),
            i64::from(m.away_goals),
            oh,
            od,
            oa,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert match")?;
    Ok(())
}

fn upsert_fixture(tx: &rusqlite::Transaction<'_>, f: &Fixture) -> Result<()> {
    let (oh, od, oa) = odds_columns(f.odds);
    tx.execute(
        r#"
        INSERT INTO fixtures (
            match_date, home_team, away_team, odds_home, odds_draw, odds_away, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(match_date, home_team, away_team) DO UPDATE SET
            odds_home = excluded.odds_home,
            odds_draw = excluded.odds_draw,
            odds_away = excluded.odds_away,
            updated_at = excluded.updated_at
        "#,
        params![
            f.date.to_string(),
            f.home.as_str(),
            f.away.as_str(),
            oh,
            od,
            oa,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("upsert fixture")?;
    Ok(())
}

fn odds_columns(odds: Option<MatchOdds>) -> (Option<f64>, Option<f64>, Option<f64>) {
    match odds {
        Some(o) => (Some(o.home), Some(o.draw), Some(o.away)),
        None => (None, None, None),
    }
}

struct StoredRow {
    date: String,
    home: String,
    away: String,
    goals: Option<(i64, i64)>,
    odds: (Option<f64>, Option<f64>, Option<f64>),
}

impl StoredRow {
    fn decode(&self) -> Result<(NaiveDate, TeamId, TeamId, Option<MatchOdds>)> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .with_context(|| format!("stored date {:?}", self.date))?;
        let home = TeamId::parse(&self.home).ok_or_else(|| anyhow!("empty stored home team"))?;
        let away = TeamId::parse(&self.away).ok_or_else(|| anyhow!("empty stored away team"))?;
        let odds = match self.odds {
            (Some(h), Some(d), Some(a)) => MatchOdds::new(h, d, a),
            _ => None,
        };
        Ok((date, home, away, odds))
    }
}

pub fn load_matches(conn: &Connection) -> Result<Vec<MatchRecord>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_date, home_team, away_team, home_goals, away_goals,
                   odds_home, odds_draw, odds_away
            FROM matches
            ORDER BY match_date ASC, home_team ASC, away_team ASC
            "#,
        )
        .context("prepare load matches query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredRow {
                date: row.get(0)?,
                home: row.get(1)?,
                away: row.get(2)?,
                goals: Some((row.get(3)?, row.get(4)?)),
                odds: (row.get(5)?, row.get(6)?, row.get(7)?),
            })
        })
        .context("query load matches")?;

    let mut out = Vec::new();
    for row in rows {
        let row = row.context("decode match row")?;
        let (date, home, away, odds) = row.decode()?;
        let Some((hg, ag)) = row.goals else {
            continue;
        };
        out.push(MatchRecord {
            date,
            home,
            away,
            home_goals: u16::try_from(hg).context("stored home goals out of range")?,
            away_goals: u16::try_from(ag).context("stored away goals out of range")?,
            odds,
        });
    }
    Ok(out)
}

pub fn load_fixtures(conn: &Connection) -> Result<Vec<Fixture>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_date, home_team, away_team, odds_home, odds_draw, odds_away
            FROM fixtures
            ORDER BY match_date ASC, home_team ASC, away_team ASC
            "#,
        )
        .context("prepare load fixtures query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredRow {
                date: row.get(0)?,
                home: row.get(1)?,
                away: row.get(2)?,
                goals: None,
                odds: (row.get(3)?, row.get(4)?, row.get(5)?),
            })
        })
        .context("query load fixtures")?;

    let mut out = Vec::new();
    for row in rows {
        let row = row.context("decode fixture row")?;
        let (date, home, away, odds) = row.decode()?;
        out.push(Fixture {
            date,
            home,
            away,
            odds,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{load_fixtures, load_matches, open_store, upsert_batch};
    use crate::config::DataConfig;
    use crate::ingest::load_csv_reader;

    #[test]
    fn reingest_keeps_latest_copy_and_resolves_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_store(&dir.path().join("m.sqlite")).unwrap();
        let cfg = DataConfig::default();

        let first = "date,home_team,away_team,home_goals,away_goals,status\n\
                     2024-01-01,A,B,1,0,finished\n\
                     2024-01-08,B,A,,,scheduled\n";
        let batch = load_csv_reader(first.as_bytes(), &cfg).unwrap();
        upsert_batch(&mut conn, "first", &batch).unwrap();
        assert_eq!(load_fixtures(&conn).unwrap().len(), 1);

        let second = "date,home_team,away_team,home_goals,away_goals,status\n\
                      2024-01-01,A,B,2,0,finished\n\
                      2024-01-08,B,A,3,3,finished\n";
        let batch = load_csv_reader(second.as_bytes(), &cfg).unwrap();
        let summary = upsert_batch(&mut conn, "second", &batch).unwrap();
        assert_eq!(summary.fixtures_resolved, 1);
        assert_eq!(summary.total_matches, 2);
        assert_eq!(summary.latest_match_date.as_deref(), Some("2024-01-08"));

        let matches = load_matches(&conn).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].home_goals, 2);
        assert!(load_fixtures(&conn).unwrap().is_empty());
    }

    #[test]
    fn postponed_fixture_leaves_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_store(&dir.path().join("m.sqlite")).unwrap();
        let cfg = DataConfig::default();

        let first = "date,home_team,away_team,home_goals,away_goals,status\n\
                     2024-01-01,A,B,1,0,finished\n\
                     2024-01-08,B,A,,,scheduled\n";
        let batch = load_csv_reader(first.as_bytes(), &cfg).unwrap();
        upsert_batch(&mut conn, "first", &batch).unwrap();
        assert_eq!(load_fixtures(&conn).unwrap().len(), 1);

        let second = "date,home_team,away_team,home_goals,away_goals,status\n\
                      2024-01-08,B,A,,,postponed\n";
        let batch = load_csv_reader(second.as_bytes(), &cfg).unwrap();
        assert_eq!(batch.dropped_rows, 1);
        upsert_batch(&mut conn, "second", &batch).unwrap();
        assert!(load_fixtures(&conn).unwrap().is_empty());
        assert_eq!(load_matches(&conn).unwrap().len(), 1);
    }

    #[test]
    fn result_relisted_as_scheduled_moves_to_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = open_store(&dir.path().join("m.sqlite")).unwrap();
        let cfg = DataConfig::default();

        let first = "date,home_team,away_team,home_goals,away_goals,status\n\
                     2024-01-08,B,A,2,1,finished\n";
        let batch = load_csv_reader(first.as_bytes(), &cfg).unwrap();
        upsert_batch(&mut conn, "first", &batch).unwrap();

        let second = "date,home_team,away_team,home_goals,away_goals,status\n\
                      2024-01-08,B,A,,,scheduled\n";
        let batch = load_csv_reader(second.as_bytes(), &cfg).unwrap();
        let summary = upsert_batch(&mut conn, "second", &batch).unwrap();
        assert_eq!(summary.total_matches, 0);
        assert!(load_matches(&conn).unwrap().is_empty());
        assert_eq!(load_fixtures(&conn).unwrap().len(), 1);
    }
}
