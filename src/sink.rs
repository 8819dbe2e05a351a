use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::{thread, time::Duration};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::transform::Aggregate;

const MEMORY_URL: &str = "sqlite::memory:";

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS results (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    date         TEXT NOT NULL,
    total_amount REAL,
    created_at   TEXT DEFAULT CURRENT_TIMESTAMP
);
"#;

const INSERT_SQL: &str = "INSERT INTO results (date, total_amount) VALUES (?1, ?2)";

/// Writes aggregates into the `results` table.
pub struct Sink {
    conn: Connection,
}

impl Sink {
    pub fn connect(config: &Config) -> Result<Self> {
        let conn = connect_with_retry(&config.database_url, config.retries, config.backoff)?;
        Ok(Self { conn })
    }

    pub fn ensure_table(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_TABLE_SQL)?;
        Ok(())
    }

    /// Inserts every aggregate whose key is a calendar date and whose total is
    /// finite, in one transaction. Others are logged and left out. Returns the
    /// number of rows written.
    pub fn insert_aggregates(&mut self, aggregates: &[Aggregate]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(INSERT_SQL)?;
            for aggregate in aggregates {
                let Some(date) = storable_date(aggregate) else {
                    warn!("Rejecting aggregate with non-date key {:?}", aggregate.key);
                    continue;
                };
                if !aggregate.total.is_finite() {
                    warn!(
                        "Rejecting aggregate for {} with non-finite total {}",
                        date, aggregate.total
                    );
                    continue;
                }

                let date = date.format("%Y-%m-%d").to_string();
                stmt.execute(params![date, aggregate.total])?;
                inserted += 1;
            }
        }
        tx.commit()?;

        info!("Inserted {} aggregated rows", inserted);
        Ok(inserted)
    }
}

fn storable_date(aggregate: &Aggregate) -> Option<NaiveDate> {
    let key = aggregate.key.as_deref()?;
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

/// Maps `sqlite://path`, `sqlite:path`, `sqlite::memory:` or a bare path to
/// something `Connection::open` accepts.
fn sqlite_target(url: &str) -> Result<&str> {
    if url == MEMORY_URL {
        return Ok(":memory:");
    }
    for prefix in ["sqlite://", "sqlite:"] {
        if let Some(path) = url.strip_prefix(prefix) {
            return Ok(path);
        }
    }
    if url.contains("://") {
        let message = format!("unsupported database URL: {}", url);
        return Err(EtlError::Config(message));
    }
    Ok(url)
}

/// Opens the database and checks it with `SELECT 1`, up to `retries` times,
/// sleeping `backoff * attempt` between attempts. The last failure is
/// returned.
pub fn connect_with_retry(url: &str, retries: u32, backoff: Duration) -> Result<Connection> {
    let target = sqlite_target(url)?;
    let mut attempt = 1;
    loop {
        match try_connect(target) {
            Ok(conn) => return Ok(conn),
            Err(err) if attempt < retries => {
                warn!(
                    "Database connection attempt {}/{} failed: {}",
                    attempt, retries, err
                );
                thread::sleep(backoff * attempt);
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn try_connect(target: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(target)?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(conn)
}

/// Connects, creates the table if needed, and inserts.
pub fn load_aggregates(config: &Config, aggregates: &[Aggregate]) -> Result<usize> {
    let mut sink = Sink::connect(config)?;
    sink.ensure_table()?;
    sink.insert_aggregates(aggregates)
}
