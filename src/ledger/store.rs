//! SQLite-backed ledger of watched addresses, unspent outputs and the sync cursor.
//!
//! Tables are prefixed with the network identifier given at construction:
//! `{network}_addresses`, `{network}_utxo`, `{network}_last_block`.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::blockchain::types::{ChainError, ChainResult, OutPoint};
use crate::ledger::types::{AppliedBlock, UnspentOutput, WatchedAddress};

const MEMORY_URLS: [&str; 3] = ["sqlite::memory:", ":memory:", "sqlite://:memory:"];

/// Per-network table names.
#[derive(Debug, Clone)]
struct Tables {
    addresses: String,
    utxo: String,
    last_block: String,
}

/// Whether `network` can prefix an unquoted SQLite table name: `[a-z][a-z0-9_]*`.
pub fn is_valid_network_name(network: &str) -> bool {
    let mut chars = network.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl Tables {
    fn for_network(network: &str) -> ChainResult<Self> {
        if !is_valid_network_name(network) {
            return Err(ChainError::InvalidArgument(format!(
                "network identifier '{}' must match [a-z][a-z0-9_]*",
                network
            )));
        }
        Ok(Self {
            addresses: format!("{}_addresses", network),
            utxo: format!("{}_utxo", network),
            last_block: format!("{}_last_block", network),
        })
    }
}

/// Ledger handle, cheap to clone.
///
/// One SQLite connection is shared behind a mutex; multi-row changes commit
/// in a single SQL transaction. Nothing here coordinates with other
/// processes using the same database file.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
    network: String,
    tables: Tables,
}

fn to_sql_amount(amount: u64) -> ChainResult<i64> {
    i64::try_from(amount)
        .map_err(|_| ChainError::InvalidArgument(format!("amount {} out of range", amount)))
}

fn to_sql_height(height: u64) -> ChainResult<i64> {
    i64::try_from(height)
        .map_err(|_| ChainError::InvalidArgument(format!("height {} out of range", height)))
}

fn read_cursor(conn: &Connection, tables: &Tables) -> ChainResult<Option<u64>> {
    let height: Option<i64> = conn
        .query_row(
            &format!("SELECT MAX(block_number) FROM {}", tables.last_block),
            [],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(height.map(|h| h.max(0) as u64))
}

fn write_cursor(conn: &Connection, tables: &Tables, height: u64) -> ChainResult<()> {
    conn.execute(&format!("DELETE FROM {}", tables.last_block), [])?;
    conn.execute(
        &format!("INSERT INTO {} (block_number) VALUES (?1)", tables.last_block),
        params![to_sql_height(height)?],
    )?;
    Ok(())
}

fn upsert_output(conn: &Connection, tables: &Tables, output: &UnspentOutput) -> ChainResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} (tx_id, output_n, address, amount, used)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(tx_id, output_n)
             DO UPDATE SET address = excluded.address, amount = excluded.amount, used = 0",
            tables.utxo
        ),
        params![
            output.txid,
            output.vout,
            output.address,
            to_sql_amount(output.amount)?
        ],
    )?;
    Ok(())
}

fn delete_output(conn: &Connection, tables: &Tables, outpoint: &OutPoint) -> ChainResult<bool> {
    let removed = conn.execute(
        &format!("DELETE FROM {} WHERE tx_id = ?1 AND output_n = ?2", tables.utxo),
        params![outpoint.txid, outpoint.vout],
    )?;
    Ok(removed > 0)
}

fn flag_used(conn: &Connection, tables: &Tables, outpoint: &OutPoint) -> ChainResult<bool> {
    let updated = conn.execute(
        &format!(
            "UPDATE {} SET used = 1 WHERE tx_id = ?1 AND output_n = ?2 AND used = 0",
            tables.utxo
        ),
        params![outpoint.txid, outpoint.vout],
    )?;
    Ok(updated > 0)
}

fn row_to_output(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnspentOutput> {
    let amount: i64 = row.get(3)?;
    Ok(UnspentOutput {
        txid: row.get(0)?,
        vout: row.get(1)?,
        address: row.get(2)?,
        amount: amount.max(0) as u64,
        used: row.get(4)?,
    })
}

impl Ledger {
    /// Open the ledger at `url` and create this network's tables.
    ///
    /// Accepts `sqlite://path`, a plain path, or `sqlite::memory:`.
    pub fn open(url: &str, network: &str) -> ChainResult<Self> {
        let tables = Tables::for_network(network)?;
        let conn = if MEMORY_URLS.contains(&url) {
            Connection::open_in_memory()?
        } else {
            let path = url.strip_prefix("sqlite://").unwrap_or(url);
            Connection::open(path)?
        };

        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
            network: network.to_string(),
            tables,
        };
        ledger.migrate()?;

        tracing::debug!(network, url, "Ledger opened");
        Ok(ledger)
    }

    /// Open an in-memory ledger (for testing).
    pub fn open_in_memory(network: &str) -> ChainResult<Self> {
        Self::open("sqlite::memory:", network)
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    fn conn(&self) -> ChainResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ChainError::Storage(format!("Lock error: {}", e)))
    }

    fn migrate(&self) -> ChainResult<()> {
        let conn = self.conn()?;
        let Tables {
            addresses,
            utxo,
            last_block,
        } = &self.tables;

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {addresses} (
                address TEXT PRIMARY KEY,
                block_number INTEGER
            );

            CREATE TABLE IF NOT EXISTS {utxo} (
                tx_id TEXT NOT NULL,
                output_n INTEGER NOT NULL,
                address TEXT NOT NULL,
                amount INTEGER NOT NULL,
                used BOOLEAN NOT NULL DEFAULT 0,
                PRIMARY KEY (tx_id, output_n)
            );

            CREATE INDEX IF NOT EXISTS idx_{utxo}_address ON {utxo}(address);

            CREATE TABLE IF NOT EXISTS {last_block} (
                block_number INTEGER PRIMARY KEY
            );
            "#
        ))?;

        Ok(())
    }

    /// Seed the cursor with `height` unless one is already stored.
    ///
    /// Returns the effective cursor.
    pub fn init_cursor(&self, height: u64) -> ChainResult<u64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cursor = match read_cursor(&tx, &self.tables)? {
            Some(existing) => existing,
            None => {
                write_cursor(&tx, &self.tables, height)?;
                tracing::info!(network = %self.network, height, "Ledger cursor bootstrapped");
                height
            }
        };
        tx.commit()?;
        Ok(cursor)
    }

    /// Next height to process, if bootstrapped.
    pub fn cursor(&self) -> ChainResult<Option<u64>> {
        let conn = self.conn()?;
        read_cursor(&conn, &self.tables)
    }

    pub fn set_cursor(&self, height: u64) -> ChainResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_cursor(&tx, &self.tables, height)?;
        tx.commit()?;
        Ok(())
    }

    /// Insert or update a watched address.
    ///
    /// A `from_height` below the cursor rewinds the cursor so the gap is
    /// back-filled on the next poll.
    pub fn add_watched_address(&self, address: &str, from_height: Option<u64>) -> ChainResult<()> {
        if address.trim().is_empty() {
            return Err(ChainError::InvalidArgument("empty address".to_string()));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cursor = read_cursor(&tx, &self.tables)?;
        let stored_height = from_height.or(cursor);

        tx.execute(
            &format!(
                "INSERT INTO {} (address, block_number) VALUES (?1, ?2)
                 ON CONFLICT(address) DO UPDATE SET block_number = excluded.block_number",
                self.tables.addresses
            ),
            params![address, stored_height.map(to_sql_height).transpose()?],
        )?;

        if let (Some(from), Some(current)) = (from_height, cursor) {
            if from < current {
                write_cursor(&tx, &self.tables, from)?;
                tracing::info!(address, from, previous = current, "Cursor rewound for back-fill");
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn list_watched_addresses(&self) -> ChainResult<Vec<WatchedAddress>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT address, block_number FROM {} ORDER BY rowid",
            self.tables.addresses
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let height: Option<i64> = row.get(1)?;
                Ok(WatchedAddress {
                    address: row.get(0)?,
                    sync_from_height: height.map(|h| h.max(0) as u64),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Watched addresses as a lookup set.
    pub fn watched_address_set(&self) -> ChainResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT address FROM {}", self.tables.addresses))?;
        let set = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(set)
    }

    /// Ids of every transaction that has a tracked output, used or not.
    pub fn tracked_tx_ids(&self) -> ChainResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT DISTINCT tx_id FROM {}", self.tables.utxo))?;
        let set = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(set)
    }

    /// Insert an output, or refresh it and clear its `used` flag.
    pub fn add_unspent_output(&self, output: &UnspentOutput) -> ChainResult<()> {
        let conn = self.conn()?;
        upsert_output(&conn, &self.tables, output)
    }

    pub fn get_unspent_output(&self, outpoint: &OutPoint) -> ChainResult<Option<UnspentOutput>> {
        let conn = self.conn()?;
        let output = conn
            .query_row(
                &format!(
                    "SELECT tx_id, output_n, address, amount, used FROM {}
                     WHERE tx_id = ?1 AND output_n = ?2",
                    self.tables.utxo
                ),
                params![outpoint.txid, outpoint.vout],
                row_to_output,
            )
            .optional()?;
        Ok(output)
    }

    /// Outputs owned by `address` in insertion order.
    pub fn list_unspent_outputs(
        &self,
        address: &str,
        include_used: bool,
    ) -> ChainResult<Vec<UnspentOutput>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT tx_id, output_n, address, amount, used FROM {}
             WHERE address = ?1 AND (?2 OR used = 0)
             ORDER BY rowid",
            self.tables.utxo
        ))?;
        let outputs = stmt
            .query_map(params![address, include_used], row_to_output)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(outputs)
    }

    /// Sum of non-used outputs owned by `address`.
    pub fn balance(&self, address: &str) -> ChainResult<u64> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(amount), 0) FROM {} WHERE address = ?1 AND used = 0",
                self.tables.utxo
            ),
            params![address],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// Reserve an output. Returns false if it was absent or already used.
    pub fn mark_used(&self, outpoint: &OutPoint) -> ChainResult<bool> {
        let conn = self.conn()?;
        flag_used(&conn, &self.tables, outpoint)
    }

    /// Reserve several outputs in one commit. Returns how many changed.
    pub fn mark_used_many(&self, outpoints: &[OutPoint]) -> ChainResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut changed = 0;
        for outpoint in outpoints {
            if flag_used(&tx, &self.tables, outpoint)? {
                changed += 1;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Drop an output. Returns false if it was already absent.
    pub fn remove_unspent_output(&self, outpoint: &OutPoint) -> ChainResult<bool> {
        let conn = self.conn()?;
        delete_output(&conn, &self.tables, outpoint)
    }

    /// Commit one block's effects and advance the cursor to `next_height`.
    ///
    /// Creations are written before removals so an output created and spent
    /// inside the same block ends up absent.
    pub fn apply_block(
        &self,
        next_height: u64,
        created: &[UnspentOutput],
        spent: &[OutPoint],
    ) -> ChainResult<AppliedBlock> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut applied = AppliedBlock::default();

        for output in created {
            upsert_output(&tx, &self.tables, output)?;
            applied.added += 1;
        }
        for outpoint in spent {
            if delete_output(&tx, &self.tables, outpoint)? {
                applied.removed += 1;
            }
        }
        write_cursor(&tx, &self.tables, next_height)?;

        tx.commit()?;
        Ok(applied)
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("network", &self.network)
            .finish()
    }
}
