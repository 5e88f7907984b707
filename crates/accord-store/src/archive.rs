//! # Relational Archive
//!
//! A SQLite file next to the key/value store recording block headers and
//! mempool snapshots for ad-hoc queries. The archive is derivative: every
//! row can be rebuilt from the key/value store, so writes are best-effort
//! and a lost file costs nothing but the indexes.

use crate::errors::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use shared_types::{Hash, TransactionKind};
use std::path::Path;
use tracing::debug;

const DDLS: [&str; 2] = [
    r#"CREATE TABLE IF NOT EXISTS "blocks" (
    "height"    INT,
    "hash"      TEXT,
    "parent"    TEXT,
    "encoded"   BLOB,
    PRIMARY KEY ("height", "hash")
)"#,
    r#"CREATE TABLE IF NOT EXISTS "tx_pool" (
    "kind"      INT,
    "hash"      TEXT,
    "encoded"   BLOB,
    PRIMARY KEY ("kind", "hash")
)"#,
];

/// The derivative relational store.
pub struct ChainArchive {
    conn: Connection,
}

impl ChainArchive {
    /// Open (or create) the archive at `path` and ensure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init_schema(conn)
    }

    /// In-memory archive for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init_schema(Connection::open_in_memory()?)
    }

    fn init_schema(conn: Connection) -> Result<Self, StoreError> {
        for ddl in DDLS {
            conn.execute(ddl, [])?;
        }
        Ok(Self { conn })
    }

    /// Record an accepted block.
    pub fn record_block(
        &self,
        height: u32,
        hash: &Hash,
        parent: &Hash,
        encoded: &[u8],
    ) -> Result<(), StoreError> {
        self.conn.execute(
            r#"INSERT OR REPLACE INTO "blocks" ("height", "hash", "parent", "encoded")
               VALUES (?1, ?2, ?3, ?4)"#,
            params![height, hex::encode(hash), hex::encode(parent), encoded],
        )?;
        debug!(height, hash = %hex::encode(&hash[..4]), "archived block");
        Ok(())
    }

    /// Replace the pool snapshot with the current pending set.
    pub fn record_pool_snapshot(
        &mut self,
        entries: &[(TransactionKind, Hash, Vec<u8>)],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(r#"DELETE FROM "tx_pool""#, [])?;
        for (kind, hash, encoded) in entries {
            tx.execute(
                r#"INSERT INTO "tx_pool" ("kind", "hash", "encoded") VALUES (?1, ?2, ?3)"#,
                params![kind.tag(), hex::encode(hash), encoded],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of archived blocks.
    pub fn block_count(&self) -> Result<u64, StoreError> {
        let count: u64 = self
            .conn
            .query_row(r#"SELECT COUNT(*) FROM "blocks""#, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Encoded bytes of the archived block at `height`, if any.
    pub fn block_at_height(&self, height: u32) -> Result<Option<Vec<u8>>, StoreError> {
        let encoded = self
            .conn
            .query_row(
                r#"SELECT "encoded" FROM "blocks" WHERE "height" = ?1"#,
                params![height],
                |row| row.get(0),
            )
            .optional()?;
        Ok(encoded)
    }

    /// Number of snapshotted pool entries.
    pub fn pool_count(&self) -> Result<u64, StoreError> {
        let count: u64 = self
            .conn
            .query_row(r#"SELECT COUNT(*) FROM "tx_pool""#, [], |row| row.get(0))?;
        Ok(count)
    }
}
