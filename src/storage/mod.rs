use crate::config::TableRef;
use crate::models::{COLUMNS, SaleListingRow};
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::{AccessMode, Config, Connection, params, params_from_iter};
use std::path::Path;
use tracing::{info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const RUN_LOG_DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS ingest_run_seq START 1;

CREATE TABLE IF NOT EXISTS ingest_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('ingest_run_seq'),
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    rows_published  BIGINT DEFAULT 0,
    error_msg       VARCHAR
);
"#;

fn listing_table_ddl(table: &TableRef) -> String {
    let cols = COLUMNS
        .iter()
        .map(|c| format!("    {} VARCHAR", c))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n)", table.sql_name(), cols)
}

fn select_listings_sql(table: &TableRef) -> String {
    format!("SELECT {} FROM {}", COLUMNS.join(", "), table.sql_name())
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Existing,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Empty batch; the table was left as it was.
    Skipped,
    Replaced { deleted: usize, inserted: usize },
}

#[derive(Debug, Clone)]
pub struct IngestRun {
    pub id: i64,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub rows_published: i64,
    pub error_msg: Option<String>,
}

// ── Repository ────────────────────────────────────────────────────────────────

/// Owns the warehouse connection and the one destination table.
///
/// This process is assumed to be the table's only writer: a publish deletes
/// every row and appends the new batch inside one transaction, so readers
/// see either the old snapshot or the new one.
pub struct Repository {
    conn: Connection,
    table: TableRef,
}

impl Repository {
    pub fn open(path: &Path, table: TableRef) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn, table })
    }

    /// Read-only handle for the dashboard, so it never blocks or races the
    /// ingest writer.
    pub fn open_read_only(path: &Path, table: TableRef) -> Result<Self> {
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(path, config)
            .with_context(|| format!("Failed to open DuckDB read-only at {:?}", path))?;
        Ok(Self { conn, table })
    }

    pub fn open_in_memory(table: TableRef) -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            table,
        })
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(RUN_LOG_DDL).context("Run log DDL failed")?;
        self.ensure_table()?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Destination table ─────────────────────────────────────────────────────

    fn table_exists(&self) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            params![self.table.dataset, self.table.table],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    fn existing_columns(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name FROM information_schema.columns
             WHERE table_schema = ? AND table_name = ?
             ORDER BY ordinal_position",
        )?;
        let cols = stmt
            .query_map(params![self.table.dataset, self.table.table], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(cols)
    }

    /// Create the table with the fixed ten-column schema when it is missing.
    /// An existing table is never altered.
    pub fn ensure_table(&self) -> Result<TableStatus> {
        if self.table_exists()? {
            let cols = self.existing_columns()?;
            if cols.iter().map(String::as_str).ne(COLUMNS) {
                warn!(
                    "Table {} exists with columns {:?}; expected {:?}. Leaving it untouched.",
                    self.table, cols, COLUMNS
                );
            } else {
                info!("Table {} already exists.", self.table);
            }
            return Ok(TableStatus::Existing);
        }

        info!("Table {} not found. Creating it…", self.table);
        self.conn
            .execute_batch(&format!(
                "CREATE SCHEMA IF NOT EXISTS \"{}\";\n{};",
                self.table.dataset.replace('"', "\"\""),
                listing_table_ddl(&self.table)
            ))
            .with_context(|| format!("create table {}", self.table))?;
        info!("Table {} created.", self.table);
        Ok(TableStatus::Created)
    }

    /// Replace the table's content with `rows`. An empty batch is a no-op.
    pub fn publish(&self, rows: &[SaleListingRow]) -> Result<PublishOutcome> {
        self.ensure_table()?;

        if rows.is_empty() {
            warn!("No rows to publish; leaving {} untouched.", self.table);
            return Ok(PublishOutcome::Skipped);
        }

        let name = self.table.sql_name();
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            name,
            COLUMNS.join(", "),
            vec!["?"; COLUMNS.len()].join(", ")
        );

        let tx = self.conn.unchecked_transaction()?;

        info!("Deleting existing rows in {}.", self.table);
        let deleted = tx
            .execute(&format!("DELETE FROM {}", name), [])
            .with_context(|| format!("delete from {}", self.table))?;

        {
            let mut stmt = tx.prepare(&insert)?;
            for row in rows {
                stmt.execute(params_from_iter(row.values()))
                    .with_context(|| format!("insert app {}", row.app_id))?;
            }
        }

        tx.commit()?;
        info!("Loaded {} rows into {} ({} replaced).", rows.len(), self.table, deleted);

        Ok(PublishOutcome::Replaced {
            deleted,
            inserted: rows.len(),
        })
    }

    pub fn row_count(&self) -> Result<i64> {
        if !self.table_exists()? {
            return Ok(0);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.sql_name());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    /// The dashboard's bulk query: every row, ten named columns.
    pub fn load_listings(&self) -> Result<Vec<SaleListingRow>> {
        let mut stmt = self.conn.prepare(&select_listings_sql(&self.table))?;
        let text = |r: &duckdb::Row<'_>, i: usize| -> duckdb::Result<String> {
            Ok(r.get::<_, Option<String>>(i)?.unwrap_or_default())
        };

        let rows = stmt
            .query_map([], |r| {
                Ok(SaleListingRow {
                    name: text(r, 0)?,
                    discount: text(r, 1)?,
                    price: text(r, 2)?,
                    rating: text(r, 3)?,
                    release_date: text(r, 4)?,
                    sale_ends_at: text(r, 5)?,
                    sale_starts_at: text(r, 6)?,
                    detail_link: text(r, 7)?,
                    image_link: text(r, 8)?,
                    app_id: text(r, 9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("load {}", self.table))?;
        Ok(rows)
    }

    // ── Ingest run log ────────────────────────────────────────────────────────

    pub fn begin_ingest_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO ingest_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_ingest_run(&self, run_id: i64, rows: usize, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            r#"UPDATE ingest_runs SET
               finished_at = ?, status = ?, rows_published = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                rows as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Newest runs first. Empty when the run log was never created.
    pub fn recent_ingest_runs(&self, limit: usize) -> Result<Vec<IngestRun>> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'ingest_runs'",
            [],
            |r| r.get(0),
        )?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, started_at, finished_at, status, rows_published, error_msg
             FROM ingest_runs ORDER BY id DESC LIMIT {}",
            limit
        ))?;
        let runs = stmt
            .query_map([], |r| {
                Ok(IngestRun {
                    id: r.get(0)?,
                    started_at: r.get(1)?,
                    finished_at: r.get(2)?,
                    status: r.get(3)?,
                    rows_published: r.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    error_msg: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}
