// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Peter Carlton

// The MSA store: a single SQLite file mapping sequence keys to MSA records.
//
// Opening an existing store and every read only take SQLite's shared locks. Every mutation runs
// in a `BEGIN IMMEDIATE` transaction, so writers from separate handles (or processes) serialize
// on SQLite's write lock while WAL readers proceed. A writer that cannot get the lock within the
// busy timeout fails with `MsaCacheError::StoreBusy` and writes nothing.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::errors::MsaCacheError;
use crate::seq::codec::{decode, encode, StoredRecord};
use crate::seq::hash::{hash, key_prefix, Key, HASH_POLICY};
use crate::seq::record::MsaRecord;

pub const SCHEMA_VERSION: i64 = 1;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

// Rows fetched per round trip by the lazy iterators.
const PAGE_SIZE: i64 = 256;

const SCHEMA: &str = "
    CREATE TABLE msa (
      seq_no INTEGER PRIMARY KEY AUTOINCREMENT,
      key TEXT NOT NULL UNIQUE,
      sequence TEXT NOT NULL,
      unpaired_msa BLOB,
      paired_msa BLOB,
      templates BLOB NOT NULL,
      created_at TEXT NOT NULL,
      updated_at TEXT NOT NULL
    );
    CREATE INDEX idx_msa_updated_at ON msa(updated_at);
";

const SELECT_RECORD: &str =
    "SELECT seq_no, key, sequence, unpaired_msa, paired_msa, templates FROM msa";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Merged,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: Key,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub path: PathBuf,
    pub count: u64,
    pub size_bytes: u64,
}

impl StoreStatus {
    pub fn human_size(&self) -> String {
        human_size(self.size_bytes)
    }
}

#[derive(Debug)]
pub struct MsaDb {
    path: PathBuf,
    conn: Option<Connection>,
}

impl MsaDb {
    pub fn open(path: impl AsRef<Path>) -> Result<MsaDb, MsaCacheError> {
        MsaDb::open_with(&StoreConfig::new(path.as_ref()))
    }

    /// Opens (creating if needed) the store at `config.path`.
    pub fn open_with(config: &StoreConfig) -> Result<MsaDb, MsaCacheError> {
        let path = config.path.clone();
        let unavailable = |msg: String| {
            MsaCacheError::StorageUnavailable(format!("{}: {}", path.display(), msg))
        };

        if path.is_dir() {
            return Err(unavailable(String::from("is a directory")));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                info!("Creating store directory {}", parent.display());
                fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut conn =
            Connection::open_with_flags(&path, flags).map_err(|e| unavailable(e.to_string()))?;
        conn.busy_timeout(config.busy_timeout)
            .map_err(|e| unavailable(e.to_string()))?;
        // WAL is persistent; switching an existing store over would need its write lock.
        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .map_err(|e| unavailable(e.to_string()))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            let journal_mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(|e| match MsaCacheError::from(e) {
                    MsaCacheError::StoreBusy => MsaCacheError::StoreBusy,
                    other => unavailable(other.to_string()),
                })?;
            debug!("journal_mode={}", journal_mode);
        }
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| unavailable(e.to_string()))?;

        init_schema(&mut conn).map_err(|e| match e {
            MsaCacheError::Storage(msg) => unavailable(msg),
            other => other,
        })?;

        info!("Opened MSA store {}", path.display());
        Ok(MsaDb {
            path,
            conn: Some(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn conn(&self) -> Result<&Connection, MsaCacheError> {
        self.conn.as_ref().ok_or(MsaCacheError::StoreClosed)
    }

    // Runs `f` in an immediate (write-locked) transaction; any error rolls everything back.
    fn write<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, MsaCacheError>,
    ) -> Result<T, MsaCacheError> {
        let conn = self.conn.as_mut().ok_or(MsaCacheError::StoreClosed)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Strict insert. Fails with `DuplicateKey` if the sequence is already cached.
    pub fn add(&mut self, record: &MsaRecord) -> Result<Key, MsaCacheError> {
        let now = timestamp();
        let key = self.write(|tx| insert_new(tx, record, &now))?;
        info!("Added {}", key);
        Ok(key)
    }

    /// Adds all records in one transaction: either every one is inserted or none is.
    pub fn add_all(&mut self, records: &[MsaRecord]) -> Result<Vec<Key>, MsaCacheError> {
        let now = timestamp();
        let keys = self.write(|tx| {
            records
                .iter()
                .map(|r| insert_new(tx, r, &now))
                .collect::<Result<Vec<Key>, MsaCacheError>>()
        })?;
        info!("Added {} record(s)", keys.len());
        Ok(keys)
    }

    /// Adds the records that are not cached yet and leaves the others alone, in one
    /// transaction. Returns the added and the skipped keys.
    pub fn add_missing(
        &mut self,
        records: &[MsaRecord],
    ) -> Result<(Vec<Key>, Vec<Key>), MsaCacheError> {
        let now = timestamp();
        let (added, skipped) = self.write(|tx| {
            let mut added = Vec::new();
            let mut skipped = Vec::new();
            for record in records {
                let key = record.key();
                if exists(tx, &key)? {
                    skipped.push(key);
                } else {
                    insert_row(tx, &encode(record)?, &now)?;
                    added.push(key);
                }
            }
            Ok((added, skipped))
        })?;
        info!("Added {} record(s), {} already cached", added.len(), skipped.len());
        Ok((added, skipped))
    }

    /// Inserts, or merges into the stored record (see [`MsaRecord::merge`]).
    pub fn upsert(&mut self, record: &MsaRecord) -> Result<Key, MsaCacheError> {
        let now = timestamp();
        let (key, outcome) = self.write(|tx| upsert_in(tx, record, &now))?;
        info!("Upserted {} ({:?})", key, outcome);
        Ok(key)
    }

    pub fn upsert_all(
        &mut self,
        records: &[MsaRecord],
    ) -> Result<Vec<(Key, Upserted)>, MsaCacheError> {
        let now = timestamp();
        let outcomes = self.write(|tx| {
            records
                .iter()
                .map(|r| upsert_in(tx, r, &now))
                .collect::<Result<Vec<_>, MsaCacheError>>()
        })?;
        info!("Upserted {} record(s)", outcomes.len());
        Ok(outcomes)
    }

    pub fn get(&self, key: &Key) -> Result<MsaRecord, MsaCacheError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!("{} WHERE key = ?1", SELECT_RECORD))?;
        let stored = stmt
            .query_row([key.as_str()], read_stored)
            .optional()?
            .ok_or_else(|| MsaCacheError::NotFound(key.clone()))?;
        decode(&stored.1)
    }

    /// Hashes `sequence` and returns its cached record, if any.
    pub fn lookup(&self, sequence: &str) -> Result<Option<MsaRecord>, MsaCacheError> {
        match self.get(&hash(sequence)) {
            Ok(r) => Ok(Some(r)),
            Err(MsaCacheError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, key: &Key) -> Result<bool, MsaCacheError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT EXISTS(SELECT 1 FROM msa WHERE key = ?1)")?;
        Ok(stmt.query_row([key.as_str()], |row| row.get(0))?)
    }

    pub fn header(&self, key: &Key) -> Result<RecordHeader, MsaCacheError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT created_at, updated_at FROM msa WHERE key = ?1")?;
        let (created_at, updated_at) = stmt
            .query_row([key.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?
            .ok_or_else(|| MsaCacheError::NotFound(key.clone()))?;
        Ok(RecordHeader {
            key: key.clone(),
            created_at,
            updated_at,
        })
    }

    /// Keys starting with `query` (a hex prefix or a full key), in insertion order.
    ///
    /// A query that cannot be a key prefix matches nothing.
    pub fn search(&self, query: &str) -> Result<Vec<Key>, MsaCacheError> {
        let conn = self.conn()?;
        let Some(prefix) = key_prefix(query) else {
            debug!("Search query '{}' is not a hex prefix", query);
            return Ok(Vec::new());
        };
        // '~' sorts after every hex digit, so [prefix, prefix~) is exactly the prefix range of
        // the key index.
        let upper = format!("{}~", prefix);
        let mut stmt = conn
            .prepare_cached("SELECT key FROM msa WHERE key >= ?1 AND key < ?2 ORDER BY seq_no")?;
        let rows = stmt.query_map(params![prefix, upper], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            let text = row?;
            match Key::parse(&text) {
                Ok(k) => keys.push(k),
                Err(e) => warn!("Skipping malformed key in store: {}", e),
            }
        }
        debug!("Search '{}': {} match(es)", prefix, keys.len());
        Ok(keys)
    }

    /// Lazily enumerates every key in insertion order. Each call starts over from the current
    /// contents of the store.
    pub fn list(&self) -> Result<Keys<'_>, MsaCacheError> {
        let conn = self.conn()?;
        Ok(Keys {
            pager: Pager::new(
                conn,
                "SELECT seq_no, key FROM msa WHERE seq_no > ?1 ORDER BY seq_no LIMIT ?2",
                read_key,
            ),
        })
    }

    /// Lazily enumerates full records. A row that does not decode yields an `Err` item and the
    /// iteration goes on.
    pub fn records(&self) -> Result<Records<'_>, MsaCacheError> {
        let conn = self.conn()?;
        Ok(Records {
            pager: Pager::new(
                conn,
                "SELECT seq_no, key, sequence, unpaired_msa, paired_msa, templates FROM msa \
                 WHERE seq_no > ?1 ORDER BY seq_no LIMIT ?2",
                read_stored,
            ),
        })
    }

    pub fn delete(&mut self, key: &Key) -> Result<bool, MsaCacheError> {
        let n = self.write(|tx| Ok(tx.execute("DELETE FROM msa WHERE key = ?1", [key.as_str()])?))?;
        if n > 0 {
            info!("Deleted {}", key);
        }
        Ok(n > 0)
    }

    pub fn count(&self) -> Result<u64, MsaCacheError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM msa", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn status(&self) -> Result<StoreStatus, MsaCacheError> {
        let count = self.count()?;
        let size_bytes = fs::metadata(&self.path)?.len();
        Ok(StoreStatus {
            path: self.path.clone(),
            count,
            size_bytes,
        })
    }

    /// Releases the connection. Calling it again is a no-op; every other operation then fails
    /// with `StoreClosed`.
    pub fn close(&mut self) -> Result<(), MsaCacheError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| MsaCacheError::from(e))?;
            info!("Closed MSA store {}", self.path.display());
        }
        Ok(())
    }
}

// An existing store is checked with plain reads, so opening never waits on a writer. Only a
// fresh file takes the write lock, and re-checks under it.
fn init_schema(conn: &mut Connection) -> Result<(), MsaCacheError> {
    if let Some(meta) = read_meta(conn)? {
        return meta.check();
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS msa_meta (k TEXT PRIMARY KEY, v TEXT NOT NULL) WITHOUT ROWID;",
    )?;
    match read_meta(&tx)? {
        Some(meta) => meta.check()?,
        None => {
            if table_exists(&tx, "msa")? {
                return Err(MsaCacheError::StorageUnavailable(String::from(
                    "found an 'msa' table without store metadata",
                )));
            }
            tx.execute_batch(SCHEMA)?;
            tx.execute(
                "INSERT INTO msa_meta (k, v) VALUES ('schema_version', ?1), ('hash_policy', ?2)",
                params![SCHEMA_VERSION.to_string(), HASH_POLICY],
            )?;
            info!("Initialized empty MSA store (schema {})", SCHEMA_VERSION);
        }
    }
    tx.commit()?;
    Ok(())
}

struct StoreMeta {
    version: String,
    policy: Option<String>,
}

impl StoreMeta {
    fn check(&self) -> Result<(), MsaCacheError> {
        if self.version != SCHEMA_VERSION.to_string() {
            return Err(MsaCacheError::StorageUnavailable(format!(
                "unsupported schema version {} (expected {})",
                self.version, SCHEMA_VERSION
            )));
        }
        if self.policy.as_deref() != Some(HASH_POLICY) {
            return Err(MsaCacheError::StorageUnavailable(format!(
                "store keys use hash policy {:?}, this build uses {}",
                self.policy, HASH_POLICY
            )));
        }
        Ok(())
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, MsaCacheError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )?)
}

// None if the store has not been initialized yet.
fn read_meta(conn: &Connection) -> Result<Option<StoreMeta>, MsaCacheError> {
    if !table_exists(conn, "msa_meta")? {
        return Ok(None);
    }
    let value = |k: &str| -> Result<Option<String>, MsaCacheError> {
        Ok(conn
            .query_row("SELECT v FROM msa_meta WHERE k = ?1", [k], |row| row.get(0))
            .optional()?)
    };
    let Some(version) = value("schema_version")? else {
        return Ok(None);
    };
    Ok(Some(StoreMeta {
        version,
        policy: value("hash_policy")?,
    }))
}

fn read_key(row: &Row<'_>) -> rusqlite::Result<(i64, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn read_stored(row: &Row<'_>) -> rusqlite::Result<(i64, StoredRecord)> {
    Ok((
        row.get(0)?,
        StoredRecord {
            key: row.get(1)?,
            sequence: row.get(2)?,
            unpaired_msa: row.get(3)?,
            paired_msa: row.get(4)?,
            templates: row.get(5)?,
        },
    ))
}

fn insert_row(tx: &Transaction<'_>, stored: &StoredRecord, now: &str) -> Result<(), MsaCacheError> {
    tx.execute(
        "INSERT INTO msa (key, sequence, unpaired_msa, paired_msa, templates, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            stored.key,
            stored.sequence,
            stored.unpaired_msa,
            stored.paired_msa,
            stored.templates,
            now
        ],
    )?;
    Ok(())
}

fn exists(tx: &Transaction<'_>, key: &Key) -> Result<bool, MsaCacheError> {
    Ok(tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM msa WHERE key = ?1)",
        [key.as_str()],
        |row| row.get(0),
    )?)
}

fn insert_new(tx: &Transaction<'_>, record: &MsaRecord, now: &str) -> Result<Key, MsaCacheError> {
    let key = record.key();
    if exists(tx, &key)? {
        return Err(MsaCacheError::DuplicateKey(key));
    }
    insert_row(tx, &encode(record)?, now)?;
    Ok(key)
}

fn upsert_in(
    tx: &Transaction<'_>,
    record: &MsaRecord,
    now: &str,
) -> Result<(Key, Upserted), MsaCacheError> {
    let key = record.key();
    let existing = tx
        .query_row(
            &format!("{} WHERE key = ?1", SELECT_RECORD),
            [key.as_str()],
            read_stored,
        )
        .optional()?;

    let Some((_, stored)) = existing else {
        insert_row(tx, &encode(record)?, now)?;
        return Ok((key, Upserted::Inserted));
    };

    // A stored row that does not decode aborts the upsert instead of being overwritten.
    let mut merged = decode(&stored)?;
    if !merged.merge(record) {
        debug!("Upsert of {} changed nothing", key.short(12));
        return Ok((key, Upserted::Unchanged));
    }
    let enc = encode(&merged)?;
    tx.execute(
        "UPDATE msa SET unpaired_msa = ?2, paired_msa = ?3, templates = ?4, updated_at = ?5
         WHERE key = ?1",
        params![key.as_str(), enc.unpaired_msa, enc.paired_msa, enc.templates, now],
    )?;
    Ok((key, Upserted::Merged))
}

fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PB", size)
}

// Keyset pagination over `seq_no`: holds no statement between pages, so the iterator never pins
// a read snapshot and each page sees whatever has been committed.
struct Pager<'db, T> {
    conn: &'db Connection,
    sql: &'static str,
    map: fn(&Row<'_>) -> rusqlite::Result<(i64, T)>,
    after: i64,
    page: VecDeque<T>,
    done: bool,
}

impl<'db, T> Pager<'db, T> {
    fn new(
        conn: &'db Connection,
        sql: &'static str,
        map: fn(&Row<'_>) -> rusqlite::Result<(i64, T)>,
    ) -> Self {
        Pager {
            conn,
            sql,
            map,
            after: 0,
            page: VecDeque::new(),
            done: false,
        }
    }

    fn fill(&mut self) -> Result<(), MsaCacheError> {
        let conn = self.conn;
        let mut stmt = conn.prepare_cached(self.sql)?;
        let rows = stmt.query_map(params![self.after, PAGE_SIZE], self.map)?;
        let mut fetched: i64 = 0;
        for row in rows {
            let (seq_no, item) = row?;
            self.after = seq_no;
            self.page.push_back(item);
            fetched += 1;
        }
        if fetched < PAGE_SIZE {
            self.done = true;
        }
        Ok(())
    }

    fn next_item(&mut self) -> Option<Result<T, MsaCacheError>> {
        if self.page.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(Ok)
    }
}

pub struct Keys<'db> {
    pager: Pager<'db, String>,
}

impl Iterator for Keys<'_> {
    type Item = Result<Key, MsaCacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        let text = match self.pager.next_item()? {
            Ok(t) => t,
            Err(e) => return Some(Err(e)),
        };
        Some(Key::parse(&text).map_err(|e| MsaCacheError::CorruptRecord {
            key: text,
            reason: e.to_string(),
        }))
    }
}

pub struct Records<'db> {
    pager: Pager<'db, StoredRecord>,
}

impl Iterator for Records<'_> {
    type Item = Result<(Key, MsaRecord), MsaCacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        let stored = match self.pager.next_item()? {
            Ok(s) => s,
            Err(e) => return Some(Err(e)),
        };
        Some(decode(&stored).map(|record| (record.key(), record)))
    }
}
