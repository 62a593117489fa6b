//! SQLite-backed implementation of the tabular store contract.
//!
//! The sheet is emulated as a cell grid (`sheet_cells`), one database row
//! per cell, addressed by 1-indexed sheet row and column. Row 1 holds the
//! column headers and is written by [`SqliteSheet::migrate`]; data rows
//! start at row 2 and stay contiguous because deletes shift later rows up.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rusqlite::{params, Connection};
use scout_roster_core::{
    column_headers, CellWrite, RosterError, TabularStore, COLUMN_COUNT, HEADER_ROWS,
};

/// Connection attempts before the session is declared unreachable.
pub const CONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct SqliteSheet {
    conn: Connection,
}

impl SqliteSheet {
    /// Opens the sheet database without retrying.
    ///
    /// # Errors
    /// Returns [`RosterError::BackingStore`] when the database cannot be
    /// opened.
    pub fn open(path: &Path) -> Result<Self, RosterError> {
        let conn = Connection::open(path).map_err(store_err)?;
        Ok(Self { conn })
    }

    /// Creates the cell table and writes the header row. Idempotent.
    ///
    /// # Errors
    /// Returns [`RosterError::BackingStore`] when schema setup fails.
    pub fn migrate(&self) -> Result<(), RosterError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sheet_cells (
                    row INTEGER NOT NULL,
                    col INTEGER NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (row, col)
                )",
            )
            .map_err(store_err)?;

        let mut statement = self
            .conn
            .prepare("INSERT OR IGNORE INTO sheet_cells (row, col, value) VALUES (1, ?1, ?2)")
            .map_err(store_err)?;
        for (index, header) in column_headers().iter().enumerate() {
            let _ = statement
                .execute(params![to_i64(index + 1), header])
                .map_err(store_err)?;
        }
        Ok(())
    }

    /// Establishes the sheet connection with the standard retry policy:
    /// up to [`CONNECT_ATTEMPTS`] attempts, [`CONNECT_RETRY_DELAY`] apart.
    ///
    /// # Errors
    /// Returns [`RosterError::Connection`] after the attempts are exhausted.
    pub fn connect(path: &Path) -> Result<Self, RosterError> {
        Self::connect_with(path, CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY)
    }

    /// Same as [`SqliteSheet::connect`] with an explicit retry policy.
    ///
    /// # Errors
    /// Returns [`RosterError::Connection`] after the attempts are exhausted.
    pub fn connect_with(
        path: &Path,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, RosterError> {
        let attempts = attempts.max(1);
        let mut last_error = RosterError::Connection("no attempt made".to_string());
        for attempt in 1..=attempts {
            match Self::open_and_verify(path) {
                Ok(sheet) => return Ok(sheet),
                Err(err) => {
                    last_error = err;
                    if attempt < attempts {
                        thread::sleep(delay);
                    }
                }
            }
        }
        Err(RosterError::Connection(format!(
            "failed to open sheet after {attempts} attempts: {last_error}"
        )))
    }

    fn open_and_verify(path: &Path) -> Result<Self, RosterError> {
        let sheet = Self::open(path)?;
        sheet.migrate()?;
        // Probe read so a connect failure surfaces here, not on first use.
        let _ = sheet.fetch_all_rows()?;
        Ok(sheet)
    }

    fn last_row(&self) -> Result<usize, RosterError> {
        let last: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(row), ?1) FROM sheet_cells",
                params![to_i64(HEADER_ROWS)],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        usize::try_from(last)
            .map_err(|_| RosterError::BackingStore(format!("invalid row number {last}")))
    }

    fn row_exists(&self, row: usize) -> Result<bool, RosterError> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sheet_cells WHERE row = ?1)",
                params![to_i64(row)],
                |row| row.get(0),
            )
            .map_err(store_err)
    }
}

impl TabularStore for SqliteSheet {
    fn fetch_all_rows(&self) -> Result<Vec<Vec<String>>, RosterError> {
        let mut statement = self
            .conn
            .prepare(
                "SELECT row, col, value FROM sheet_cells WHERE row > ?1 ORDER BY row, col",
            )
            .map_err(store_err)?;
        let cells = statement
            .query_map(params![to_i64(HEADER_ROWS)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(store_err)?;

        let mut rows: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        for cell in cells {
            let (row, col, value) = cell.map_err(store_err)?;
            let entry = rows
                .entry(row)
                .or_insert_with(|| vec![String::new(); COLUMN_COUNT]);
            let Ok(col) = usize::try_from(col) else {
                continue;
            };
            if (1..=COLUMN_COUNT).contains(&col) {
                entry[col - 1] = value;
            }
        }
        Ok(rows.into_values().collect())
    }

    fn append_row(&mut self, values: &[String]) -> Result<(), RosterError> {
        let row = self.last_row()? + 1;
        let tx = self.conn.transaction().map_err(store_err)?;
        {
            let mut statement = tx
                .prepare("INSERT INTO sheet_cells (row, col, value) VALUES (?1, ?2, ?3)")
                .map_err(store_err)?;
            for column in 1..=COLUMN_COUNT {
                let value = values.get(column - 1).map_or("", String::as_str);
                let _ = statement
                    .execute(params![to_i64(row), to_i64(column), value])
                    .map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)
    }

    fn update_cells(&mut self, cells: &[CellWrite]) -> Result<(), RosterError> {
        for cell in cells {
            if cell.row <= HEADER_ROWS {
                return Err(RosterError::BackingStore(format!(
                    "row {} is reserved for headers",
                    cell.row
                )));
            }
            if !self.row_exists(cell.row)? {
                return Err(RosterError::BackingStore(format!(
                    "row {} does not exist",
                    cell.row
                )));
            }
        }

        let tx = self.conn.transaction().map_err(store_err)?;
        {
            let mut statement = tx
                .prepare(
                    "INSERT OR REPLACE INTO sheet_cells (row, col, value) VALUES (?1, ?2, ?3)",
                )
                .map_err(store_err)?;
            for cell in cells {
                let _ = statement
                    .execute(params![to_i64(cell.row), to_i64(cell.column), cell.value])
                    .map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)
    }

    fn delete_row(&mut self, row: usize) -> Result<(), RosterError> {
        if row <= HEADER_ROWS {
            return Err(RosterError::BackingStore(format!(
                "row {row} is reserved for headers"
            )));
        }
        if !self.row_exists(row)? {
            return Err(RosterError::BackingStore(format!("row {row} does not exist")));
        }

        let tx = self.conn.transaction().map_err(store_err)?;
        let _ = tx
            .execute("DELETE FROM sheet_cells WHERE row = ?1", params![to_i64(row)])
            .map_err(store_err)?;
        // Shift in two steps through negative row numbers so the primary
        // key never collides mid-update.
        let _ = tx
            .execute(
                "UPDATE sheet_cells SET row = -(row - 1) WHERE row > ?1",
                params![to_i64(row)],
            )
            .map_err(store_err)?;
        let _ = tx
            .execute("UPDATE sheet_cells SET row = -row WHERE row < 0", params![])
            .map_err(store_err)?;
        tx.commit().map_err(store_err)
    }
}

/// Pending background connection; the result arrives through a one-shot
/// channel once the worker thread finishes.
pub struct ConnectHandle {
    receiver: mpsc::Receiver<Result<SqliteSheet, RosterError>>,
}

impl ConnectHandle {
    /// Blocks until the background connection attempt completes.
    ///
    /// # Errors
    /// Returns [`RosterError::Connection`] when the attempt failed or the
    /// worker ended without reporting a result.
    pub fn wait(self) -> Result<SqliteSheet, RosterError> {
        self.receiver
            .recv()
            .map_err(|_| RosterError::Connection("connection task ended without a result".to_string()))?
    }
}

/// Starts the connection step on a background thread. Callers block on
/// [`ConnectHandle::wait`] before issuing any store operation.
#[must_use]
pub fn spawn_connect(path: PathBuf) -> ConnectHandle {
    let (sender, receiver) = mpsc::channel();
    let _ = thread::spawn(move || {
        let _ = sender.send(SqliteSheet::connect(&path));
    });
    ConnectHandle { receiver }
}

fn store_err(err: rusqlite::Error) -> RosterError {
    RosterError::BackingStore(err.to_string())
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
