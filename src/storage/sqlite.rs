use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use super::LayerStore;
use crate::domain::{CleanedRecord, RawRecord};
use crate::error::Result;
use crate::pipeline::cleaning::{QuarantineReason, QuarantinedRow};
use crate::pipeline::dimensional::{
    CategoryDim, DimensionalModel, GeographyDim, GeographyRollup, IndicatorFact,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS raw_record (
        row_number           INTEGER PRIMARY KEY,
        source_file          TEXT NOT NULL,
        area_km2             TEXT NOT NULL,
        population_density   TEXT NOT NULL,
        total_nominal_income TEXT NOT NULL,
        occupied_population  TEXT NOT NULL,
        sex                  TEXT NOT NULL,
        race_or_color        TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS cleaned_record (
        geography_id           TEXT NOT NULL,
        geography_code         TEXT NOT NULL,
        source_file            TEXT NOT NULL,
        area_km2               REAL,
        population_density     REAL,
        total_nominal_income   REAL NOT NULL,
        occupied_population    INTEGER,
        average_monthly_income REAL,
        sex                    TEXT NOT NULL,
        race_or_color          TEXT NOT NULL,
        PRIMARY KEY (geography_id, sex, race_or_color)
    );
    CREATE TABLE IF NOT EXISTS quarantine (
        row_number  INTEGER PRIMARY KEY,
        source_file TEXT NOT NULL,
        reason      TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS dim_category (
        category_id   TEXT PRIMARY KEY,
        sex           TEXT NOT NULL,
        race_or_color TEXT NOT NULL,
        UNIQUE (sex, race_or_color)
    );
    CREATE TABLE IF NOT EXISTS dim_geography (
        geography_id       TEXT PRIMARY KEY,
        geography_code     TEXT NOT NULL UNIQUE,
        source_file        TEXT NOT NULL,
        area_km2           REAL,
        population_density REAL
    );
    CREATE TABLE IF NOT EXISTS fact_indicator (
        geography_id           TEXT NOT NULL REFERENCES dim_geography (geography_id),
        category_id            TEXT NOT NULL REFERENCES dim_category (category_id),
        total_nominal_income   REAL NOT NULL,
        occupied_population    INTEGER,
        average_monthly_income REAL,
        PRIMARY KEY (geography_id, category_id)
    );
    CREATE TABLE IF NOT EXISTS agg_geography (
        geography_id           TEXT PRIMARY KEY REFERENCES dim_geography (geography_id),
        category_count         INTEGER NOT NULL,
        total_nominal_income   REAL NOT NULL,
        occupied_population    INTEGER,
        average_monthly_income REAL
    );
"#;

/// SQLite-backed layer store. Every `replace_*` call is a single
/// transaction; WAL mode keeps concurrent readers on a stable snapshot.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        info!(path = %path.display(), "Opened census store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl LayerStore for SqliteStore {
    fn append_raw(&self, records: &[RawRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let start: i64 = tx.query_row(
            "SELECT COALESCE(MAX(row_number), 0) FROM raw_record",
            [],
            |row| row.get(0),
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO raw_record (row_number, source_file, area_km2, population_density,
                     total_nominal_income, occupied_population, sex, race_or_color)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (offset, r) in records.iter().enumerate() {
                stmt.execute(params![
                    start + 1 + offset as i64,
                    r.source_file,
                    r.area_km2,
                    r.population_density,
                    r.total_nominal_income,
                    r.occupied_population,
                    r.sex,
                    r.race_or_color,
                ])?;
            }
        }
        tx.commit()?;
        debug!(appended = records.len(), "Appended raw rows");
        Ok(records.len())
    }

    fn read_raw(&self) -> Result<Vec<RawRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT row_number, source_file, area_km2, population_density, total_nominal_income,
                    occupied_population, sex, race_or_color
             FROM raw_record ORDER BY row_number",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RawRecord {
                row_number: row.get::<_, i64>(0)? as u64,
                source_file: row.get(1)?,
                area_km2: row.get(2)?,
                population_density: row.get(3)?,
                total_nominal_income: row.get(4)?,
                occupied_population: row.get(5)?,
                sex: row.get(6)?,
                race_or_color: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn replace_cleaned(&self, records: &[CleanedRecord], quarantined: &[QuarantinedRow]) -> Result<()> {
        let reasons = quarantined
            .iter()
            .map(|q| serde_json::to_string(&q.reason))
            .collect::<serde_json::Result<Vec<_>>>()?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM cleaned_record", [])?;
        tx.execute("DELETE FROM quarantine", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cleaned_record (geography_id, geography_code, source_file, area_km2,
                     population_density, total_nominal_income, occupied_population,
                     average_monthly_income, sex, race_or_color)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.geography_id.to_string(),
                    r.geography_code,
                    r.source_file,
                    r.area_km2,
                    r.population_density,
                    r.total_nominal_income,
                    r.occupied_population,
                    r.average_monthly_income,
                    r.sex,
                    r.race_or_color,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO quarantine (row_number, source_file, reason) VALUES (?1, ?2, ?3)",
            )?;
            for (q, reason) in quarantined.iter().zip(&reasons) {
                stmt.execute(params![q.row_number as i64, q.source_file, reason])?;
            }
        }
        tx.commit()?;
        debug!(cleaned = records.len(), quarantined = quarantined.len(), "Cleaned layer replaced");
        Ok(())
    }

    fn read_cleaned(&self) -> Result<Vec<CleanedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT geography_id, geography_code, source_file, area_km2, population_density,
                    total_nominal_income, occupied_population, average_monthly_income,
                    sex, race_or_color
             FROM cleaned_record ORDER BY geography_code, sex, race_or_color",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CleanedRecord {
                geography_id: uuid_at(row, 0)?,
                geography_code: row.get(1)?,
                source_file: row.get(2)?,
                area_km2: row.get(3)?,
                population_density: row.get(4)?,
                total_nominal_income: row.get(5)?,
                occupied_population: row.get(6)?,
                average_monthly_income: row.get(7)?,
                sex: row.get(8)?,
                race_or_color: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn read_quarantine(&self) -> Result<Vec<QuarantinedRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT row_number, source_file, reason FROM quarantine ORDER BY row_number")?;
        let rows = stmt.query_map([], |row| {
            let reason_json: String = row.get(2)?;
            let reason: QuarantineReason = serde_json::from_str(&reason_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
            })?;
            Ok(QuarantinedRow {
                row_number: row.get::<_, i64>(0)? as u64,
                source_file: row.get(1)?,
                reason,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn replace_dimensional(&self, model: &DimensionalModel) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "DELETE FROM agg_geography;
             DELETE FROM fact_indicator;
             DELETE FROM dim_category;
             DELETE FROM dim_geography;",
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO dim_category (category_id, sex, race_or_color) VALUES (?1, ?2, ?3)",
            )?;
            for c in &model.categories {
                stmt.execute(params![c.category_id.to_string(), c.sex, c.race_or_color])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO dim_geography (geography_id, geography_code, source_file, area_km2,
                     population_density)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for g in &model.geographies {
                stmt.execute(params![
                    g.geography_id.to_string(),
                    g.geography_code,
                    g.source_file,
                    g.area_km2,
                    g.population_density,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO fact_indicator (geography_id, category_id, total_nominal_income,
                     occupied_population, average_monthly_income)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for f in &model.facts {
                stmt.execute(params![
                    f.geography_id.to_string(),
                    f.category_id.to_string(),
                    f.total_nominal_income,
                    f.occupied_population,
                    f.average_monthly_income,
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO agg_geography (geography_id, category_count, total_nominal_income,
                     occupied_population, average_monthly_income)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for a in &model.geography_rollups {
                stmt.execute(params![
                    a.geography_id.to_string(),
                    a.category_count as i64,
                    a.total_nominal_income,
                    a.occupied_population,
                    a.average_monthly_income,
                ])?;
            }
        }
        tx.commit()?;
        debug!(facts = model.facts.len(), "Dimensional layer replaced");
        Ok(())
    }

    fn read_dimensional(&self) -> Result<DimensionalModel> {
        let mut stmt = self.conn.prepare(
            "SELECT category_id, sex, race_or_color FROM dim_category ORDER BY sex, race_or_color",
        )?;
        let categories = stmt
            .query_map([], |row| {
                Ok(CategoryDim {
                    category_id: uuid_at(row, 0)?,
                    sex: row.get(1)?,
                    race_or_color: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT geography_id, geography_code, source_file, area_km2, population_density
             FROM dim_geography ORDER BY geography_code",
        )?;
        let geographies = stmt
            .query_map([], |row| {
                Ok(GeographyDim {
                    geography_id: uuid_at(row, 0)?,
                    geography_code: row.get(1)?,
                    source_file: row.get(2)?,
                    area_km2: row.get(3)?,
                    population_density: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT f.geography_id, f.category_id, f.total_nominal_income,
                    f.occupied_population, f.average_monthly_income
             FROM fact_indicator f
             JOIN dim_geography g ON g.geography_id = f.geography_id
             JOIN dim_category c ON c.category_id = f.category_id
             ORDER BY g.geography_code, c.sex, c.race_or_color",
        )?;
        let facts = stmt
            .query_map([], |row| {
                Ok(IndicatorFact {
                    geography_id: uuid_at(row, 0)?,
                    category_id: uuid_at(row, 1)?,
                    total_nominal_income: row.get(2)?,
                    occupied_population: row.get(3)?,
                    average_monthly_income: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT a.geography_id, a.category_count, a.total_nominal_income,
                    a.occupied_population, a.average_monthly_income
             FROM agg_geography a
             JOIN dim_geography g ON g.geography_id = a.geography_id
             ORDER BY g.geography_code",
        )?;
        let geography_rollups = stmt
            .query_map([], |row| {
                Ok(GeographyRollup {
                    geography_id: uuid_at(row, 0)?,
                    category_count: row.get::<_, i64>(1)? as usize,
                    total_nominal_income: row.get(2)?,
                    occupied_population: row.get(3)?,
                    average_monthly_income: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(DimensionalModel {
            categories,
            geographies,
            facts,
            geography_rollups,
        })
    }
}
