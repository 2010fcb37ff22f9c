//! SQLite database management for results and fitted factors

use crate::{EffectKind, FactorEstimate, Field, Observation, ParameterLevel, Result, ResultRow, SosError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                game_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                field TEXT NOT NULL,
                team_name TEXT NOT NULL,
                opponent_name TEXT NOT NULL,
                team_score REAL NOT NULL,
                UNIQUE(game_id, team_name)
            );

            CREATE TABLE IF NOT EXISTS _parameter_levels (
                parameter TEXT NOT NULL,
                type TEXT NOT NULL,
                level TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS _basic_factors (
                factor TEXT NOT NULL,
                type TEXT NOT NULL,
                level TEXT NOT NULL,
                estimate REAL
            );

            CREATE INDEX IF NOT EXISTS idx_results_year ON results(year);
            "#,
        )?;
        Ok(())
    }

    // ==================== Results ====================

    /// Insert or update team-perspective result rows
    pub fn upsert_results(&mut self, rows: &[ResultRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO results (game_id, year, field, team_name, opponent_name, team_score)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(game_id, team_name) DO UPDATE SET
                    year = excluded.year,
                    field = excluded.field,
                    opponent_name = excluded.opponent_name,
                    team_score = excluded.team_score
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    row.game_id,
                    row.year,
                    row.field.as_str(),
                    row.team,
                    row.opponent,
                    row.team_score as f64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Fetch distinct result rows for a year window, weighted by distance
    /// from the reference year
    pub fn fetch_observations(
        &self,
        min_year: i32,
        max_year: i32,
        reference_year: i32,
    ) -> Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT game_id, year, field, team_name, opponent_name, team_score
             FROM results
             WHERE year BETWEEN ?1 AND ?2
             ORDER BY game_id, team_name",
        )?;

        let rows = stmt
            .query_map(params![min_year, max_year], |row| {
                let field: String = row.get(2)?;
                let year: i32 = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    year,
                    field,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(game_id, year, field, team, opponent, score)| {
                let field = Field::parse(&field)
                    .ok_or_else(|| SosError::Parse(format!("unknown field value: {}", field)))?;
                Ok(Observation {
                    game_id,
                    year,
                    field,
                    team,
                    opponent,
                    score,
                    weight: (year - reference_year) as f64,
                })
            })
            .collect()
    }

    // ==================== Model outputs ====================

    /// Replace the `_parameter_levels` table contents
    pub fn replace_parameter_levels(&mut self, levels: &[ParameterLevel]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM _parameter_levels", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO _parameter_levels (parameter, type, level) VALUES (?1, ?2, ?3)",
            )?;
            for level in levels {
                stmt.execute(params![level.parameter, level.kind.as_str(), level.level])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Get stored parameter levels
    pub fn parameter_levels(&self) -> Result<Vec<ParameterLevel>> {
        let mut stmt = self
            .conn
            .prepare("SELECT parameter, type, level FROM _parameter_levels ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(parameter, kind, level)| {
                Ok(ParameterLevel {
                    parameter,
                    kind: kind.parse()?,
                    level,
                })
            })
            .collect()
    }

    /// Replace the `_basic_factors` table contents
    pub fn replace_basic_factors(&mut self, factors: &[FactorEstimate]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM _basic_factors", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO _basic_factors (factor, type, level, estimate) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for f in factors {
                // NaN is stored as NULL
                let estimate = if f.estimate.is_finite() {
                    Some(f.estimate)
                } else {
                    None
                };
                stmt.execute(params![f.factor, f.kind.as_str(), f.level, estimate])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Get stored factor estimates, optionally for a single factor
    pub fn basic_factors(&self, factor: Option<&str>) -> Result<Vec<FactorEstimate>> {
        let mut stmt = self.conn.prepare(
            "SELECT factor, type, level, estimate FROM _basic_factors
             WHERE ?1 IS NULL OR factor = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![factor], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(factor, kind, level, estimate)| {
                Ok(FactorEstimate {
                    factor,
                    kind: kind.parse::<EffectKind>()?,
                    level,
                    estimate: estimate.unwrap_or(f64::NAN),
                })
            })
            .collect()
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let result_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))?;

        let game_count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT game_id) FROM results",
            [],
            |row| row.get(0),
        )?;

        let team_count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT team_name) FROM results",
            [],
            |row| row.get(0),
        )?;

        let (min_year, max_year): (Option<i32>, Option<i32>) = self
            .conn
            .query_row("SELECT MIN(year), MAX(year) FROM results", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?
            .unwrap_or((None, None));

        let factor_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM _basic_factors", [], |row| row.get(0))?;

        Ok(DatabaseStats {
            result_count: result_count as usize,
            game_count: game_count as usize,
            team_count: team_count as usize,
            earliest_year: min_year,
            latest_year: max_year,
            factor_count: factor_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub result_count: usize,
    pub game_count: usize,
    pub team_count: usize,
    pub earliest_year: Option<i32>,
    pub latest_year: Option<i32>,
    pub factor_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(game_id: &str, year: i32, field: Field, team: &str, opponent: &str, score: u32) -> ResultRow {
        ResultRow {
            game_id: game_id.to_string(),
            year,
            field,
            team: team.to_string(),
            opponent: opponent.to_string(),
            team_score: score,
        }
    }

    #[test]
    fn test_create_database() {
        let db = Database::in_memory().unwrap();
        let stats = db.get_stats().unwrap();
        assert_eq!(stats.result_count, 0);
        assert_eq!(stats.factor_count, 0);
        assert_eq!(stats.earliest_year, None);
    }

    #[test]
    fn test_upsert_and_fetch_window() {
        let mut db = Database::in_memory().unwrap();
        db.upsert_results(&[
            row("g1", 2023, Field::OffenseHome, "Broncos", "Storm", 20),
            row("g1", 2023, Field::DefenseHome, "Storm", "Broncos", 16),
            row("g2", 2024, Field::OffenseHome, "Storm", "Panthers", 12),
            row("g2", 2024, Field::DefenseHome, "Panthers", "Storm", 30),
        ])
        .unwrap();

        let obs = db.fetch_observations(2024, 2025, 2023).unwrap();
        assert_eq!(obs.len(), 2);
        assert!(obs.iter().all(|o| o.year == 2024 && o.weight == 1.0));
        assert_eq!(obs[0].team, "Panthers");
        assert_eq!(obs[0].field, Field::DefenseHome);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.result_count, 4);
        assert_eq!(stats.game_count, 2);
        assert_eq!(stats.team_count, 3);
        assert_eq!(stats.earliest_year, Some(2023));
        assert_eq!(stats.latest_year, Some(2024));
    }

    #[test]
    fn test_upsert_updates_existing_score() {
        let mut db = Database::in_memory().unwrap();
        db.upsert_results(&[row("g1", 2024, Field::OffenseHome, "Broncos", "Storm", 20)])
            .unwrap();
        db.upsert_results(&[row("g1", 2024, Field::OffenseHome, "Broncos", "Storm", 22)])
            .unwrap();

        let obs = db.fetch_observations(2024, 2024, 2023).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].score, 22.0);
    }

    #[test]
    fn test_replace_basic_factors_overwrites() {
        let mut db = Database::in_memory().unwrap();
        let first = vec![FactorEstimate {
            factor: "offense".to_string(),
            kind: EffectKind::Random,
            level: "Broncos".to_string(),
            estimate: 0.1,
        }];
        db.replace_basic_factors(&first).unwrap();

        let second = vec![
            FactorEstimate {
                factor: "Intercept".to_string(),
                kind: EffectKind::Fixed,
                level: "(Intercept)".to_string(),
                estimate: 3.0,
            },
            FactorEstimate {
                factor: "offense".to_string(),
                kind: EffectKind::Random,
                level: "Storm".to_string(),
                estimate: f64::NAN,
            },
        ];
        db.replace_basic_factors(&second).unwrap();

        let stored = db.basic_factors(None).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].factor, "Intercept");
        assert!(stored[1].estimate.is_nan());

        let offense = db.basic_factors(Some("offense")).unwrap();
        assert_eq!(offense.len(), 1);
        assert_eq!(offense[0].level, "Storm");
    }

    #[test]
    fn test_replace_parameter_levels() {
        let mut db = Database::in_memory().unwrap();
        let levels = vec![
            ParameterLevel {
                parameter: "field".to_string(),
                kind: EffectKind::Fixed,
                level: "none".to_string(),
            },
            ParameterLevel {
                parameter: "offense".to_string(),
                kind: EffectKind::Random,
                level: "Broncos".to_string(),
            },
        ];
        db.replace_parameter_levels(&levels).unwrap();
        db.replace_parameter_levels(&levels).unwrap();
        assert_eq!(db.parameter_levels().unwrap(), levels);
    }
}
