// 🗄️ Fact Warehouse - SQLite store of raw prescribing rows
//
// Stands in for the analytical warehouse: rows are imported from extracts
// once, then queried by code prefix. Each imported file is recorded by its
// SHA-256 so re-running an import is a no-op.

use crate::error::{CheckerError, Result};
use crate::facts::{read_facts_csv, CodeFilter, FactSource, PrescribingFact};
use crate::period::{format_period, parse_period};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for file databases; in-memory ones answer "memory" and carry on
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prescribing (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            month TEXT NOT NULL,
            bnf_code TEXT NOT NULL,
            bnf_name TEXT NOT NULL,
            items INTEGER NOT NULL
        )",
        [],
    )?;

    // Import log (one row per imported extract)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS imports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_hash TEXT UNIQUE NOT NULL,
            source_file TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            imported_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_prescribing_code ON prescribing(bnf_code)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_prescribing_month ON prescribing(month)",
        [],
    )?;

    Ok(())
}

pub fn insert_facts(conn: &Connection, facts: &[PrescribingFact]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let rows = insert_rows(&tx, facts)?;
    tx.commit()?;

    Ok(rows)
}

fn insert_rows(conn: &Connection, facts: &[PrescribingFact]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO prescribing (month, bnf_code, bnf_name, items) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for fact in facts {
        stmt.execute(params![
            format_period(fact.period),
            fact.code,
            fact.name,
            fact.quantity
        ])?;
    }

    Ok(facts.len())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportOutcome {
    Imported { rows: usize },
    AlreadyImported { imported_at: String },
}

/// Import a `month,bnf_code,bnf_name,items` extract into the warehouse
pub fn import_csv(conn: &Connection, csv_path: &Path, run_id: &str) -> Result<ImportOutcome> {
    let bytes = fs::read(csv_path)?;
    let file_hash = format!("{:x}", Sha256::digest(&bytes));

    let previous: Option<String> = conn
        .query_row(
            "SELECT imported_at FROM imports WHERE file_hash = ?1",
            params![file_hash],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(imported_at) = previous {
        debug!(path = %csv_path.display(), "extract already imported");
        return Ok(ImportOutcome::AlreadyImported { imported_at });
    }

    let facts = read_facts_csv(bytes.as_slice())?;

    // Rows and the log entry land together, so a failed import can simply be rerun
    let tx = conn.unchecked_transaction()?;
    let rows = insert_rows(&tx, &facts)?;

    let now: DateTime<Utc> = Utc::now();
    tx.execute(
        "INSERT INTO imports (file_hash, source_file, row_count, run_id, imported_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            file_hash,
            csv_path.display().to_string(),
            rows as i64,
            run_id,
            now.to_rfc3339()
        ],
    )?;
    tx.commit()?;

    info!(path = %csv_path.display(), rows, "imported prescribing extract");
    Ok(ImportOutcome::Imported { rows })
}

/// Every row whose code starts with one of the filter's prefixes
pub fn query_by_prefixes(conn: &Connection, filter: &CodeFilter) -> Result<Vec<PrescribingFact>> {
    conn.execute(
        "CREATE TEMP TABLE IF NOT EXISTS filter_prefixes (prefix TEXT PRIMARY KEY)",
        [],
    )?;
    conn.execute("DELETE FROM filter_prefixes", [])?;
    {
        let mut stmt = conn.prepare("INSERT OR IGNORE INTO filter_prefixes (prefix) VALUES (?1)")?;
        for prefix in filter.prefixes() {
            stmt.execute(params![prefix])?;
        }
    }

    let mut stmt = conn.prepare(
        "SELECT p.month, p.bnf_code, p.bnf_name, p.items
         FROM prescribing p
         WHERE EXISTS (
             SELECT 1 FROM filter_prefixes f
             WHERE substr(p.bnf_code, 1, length(f.prefix)) = f.prefix
         )
         ORDER BY p.month, p.bnf_code, p.bnf_name, p.id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(month, code, name, items)| {
            Ok(PrescribingFact {
                period: parse_period(&month)?,
                code,
                name,
                quantity: items,
            })
        })
        .collect()
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM prescribing", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// WAREHOUSE SOURCE
// ============================================================================

pub struct SqliteWarehouse {
    conn: Connection,
    label: String,
}

impl SqliteWarehouse {
    /// Open an existing warehouse; a missing file is an error, not a new empty store
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CheckerError::FactSource(format!(
                "warehouse not found: {} (run `import` first)",
                path.display()
            )));
        }
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        Ok(SqliteWarehouse {
            conn,
            label: path.display().to_string(),
        })
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteWarehouse {
            conn,
            label: ":memory:".to_string(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl FactSource for SqliteWarehouse {
    fn fetch(&self, filter: &CodeFilter) -> Result<Vec<PrescribingFact>> {
        query_by_prefixes(&self.conn, filter)
    }

    fn describe(&self) -> String {
        format!("SQLite warehouse {}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::write_facts_csv;
    use chrono::NaiveDate;
    use std::fs::File;
    use tempfile::tempdir;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn warehouse_with(facts: &[PrescribingFact]) -> SqliteWarehouse {
        let conn = Connection::open_in_memory().unwrap();
        let warehouse = SqliteWarehouse::from_connection(conn).unwrap();
        insert_facts(warehouse.connection(), facts).unwrap();
        warehouse
    }

    #[test]
    fn test_prefix_query_matches_start_of_code_only() {
        let warehouse = warehouse_with(&[
            PrescribingFact::new(month(2016, 1), "0304000A0AAAAAA", "DrugX", 10),
            PrescribingFact::new(month(2016, 1), "0603040A0AAAAAA", "DrugY", 3),
            PrescribingFact::new(month(2016, 2), "0305000B0AAAAAA", "DrugZ", 5),
        ]);

        let facts = warehouse
            .fetch(&CodeFilter::from_codes(["0304", "0305"]))
            .unwrap();

        let codes: Vec<&str> = facts.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, vec!["0304000A0AAAAAA", "0305000B0AAAAAA"]);
    }

    #[test]
    fn test_prefix_query_is_repeatable() {
        let warehouse = warehouse_with(&[
            PrescribingFact::new(month(2016, 1), "0304000A0", "DrugX", 10),
            PrescribingFact::new(month(2016, 1), "0401000A0", "DrugW", 2),
        ]);

        let first = warehouse.fetch(&CodeFilter::from_codes(["0304"])).unwrap();
        let second = warehouse.fetch(&CodeFilter::from_codes(["0401"])).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].code, "0401000A0");
    }

    #[test]
    fn test_rows_round_trip_periods() {
        let warehouse =
            warehouse_with(&[PrescribingFact::new(month(2019, 11), "0304", "DrugX", 1)]);
        let facts = warehouse.fetch(&CodeFilter::from_codes(["03"])).unwrap();
        assert_eq!(facts[0].period, month(2019, 11));
    }

    #[test]
    fn test_import_csv_is_idempotent() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("extract.csv");
        write_facts_csv(
            File::create(&csv_path).unwrap(),
            &[
                PrescribingFact::new(month(2016, 1), "0304000A0", "DrugX", 10),
                PrescribingFact::new(month(2016, 2), "0304000A0", "DrugX", 12),
            ],
        )
        .unwrap();

        let conn = Connection::open(dir.path().join("warehouse.db")).unwrap();
        setup_database(&conn).unwrap();

        let first = import_csv(&conn, &csv_path, "run-1").unwrap();
        assert_eq!(first, ImportOutcome::Imported { rows: 2 });

        let second = import_csv(&conn, &csv_path, "run-2").unwrap();
        assert!(matches!(second, ImportOutcome::AlreadyImported { .. }));

        assert_eq!(verify_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_failed_import_log_rolls_back_rows() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("extract.csv");
        write_facts_csv(
            File::create(&csv_path).unwrap(),
            &[PrescribingFact::new(month(2016, 1), "0304000A0", "DrugX", 10)],
        )
        .unwrap();

        let conn = Connection::open(dir.path().join("warehouse.db")).unwrap();
        setup_database(&conn).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_import BEFORE INSERT ON imports
             BEGIN SELECT RAISE(ABORT, 'import log unavailable'); END;",
        )
        .unwrap();

        assert!(import_csv(&conn, &csv_path, "run-1").is_err());
        assert_eq!(verify_count(&conn).unwrap(), 0);

        // Once the log accepts writes again the same file imports exactly once
        conn.execute_batch("DROP TRIGGER reject_import;").unwrap();
        let retried = import_csv(&conn, &csv_path, "run-2").unwrap();
        assert_eq!(retried, ImportOutcome::Imported { rows: 1 });
        assert_eq!(verify_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_open_missing_warehouse_is_error() {
        let dir = tempdir().unwrap();
        let result = SqliteWarehouse::open(&dir.path().join("nope.db"));
        assert!(matches!(result, Err(CheckerError::FactSource(_))));
    }
}
