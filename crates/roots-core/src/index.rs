//! Persistent leaf index and link store.
//!
//! One SQLite database holds two tables:
//! - `leaves`: one row per knowledge leaf keyed by `file_path`, carrying the
//!   content hash, the packed embedding blob and the leaf metadata
//! - `links`: typed directed edges between leaf paths, unique per
//!   `(from_path, to_path, relation)`
//!
//! Links are not foreign keys. Dangling links are tolerated, and deleting a
//! leaf cascades explicitly through both endpoints.
//!
//! Every public operation commits on its own. There are no cross-call
//! transactions, so concurrent writers resolve as last-write-wins per key.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codec;
use crate::error::StorageError;

/// Result alias for index store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Stability class of a leaf, from most to least established.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Roots,
    Trunk,
    Branches,
    #[default]
    Leaves,
}

impl Tier {
    pub const ALL: [Self; 4] = [Self::Roots, Self::Trunk, Self::Branches, Self::Leaves];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Roots => "roots",
            Self::Trunk => "trunk",
            Self::Branches => "branches",
            Self::Leaves => "leaves",
        }
    }

    /// Single-letter marker used in tree listings.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Roots => "[R]",
            Self::Trunk => "[T]",
            Self::Branches => "[B]",
            Self::Leaves => "[L]",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tier: {0} (expected roots, trunk, branches or leaves)")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roots" => Ok(Self::Roots),
            "trunk" => Ok(Self::Trunk),
            "branches" => Ok(Self::Branches),
            "leaves" => Ok(Self::Leaves),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// Indexed state of one knowledge leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub file_path: String,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub tier: Tier,
    pub confidence: f64,
    /// Stored in order, matched as a set.
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Directed typed edge between two leaf paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub from_path: String,
    pub to_path: String,
    pub relation: String,
    pub created_at: DateTime<Utc>,
}

/// Row shape before embedding, tier, tags and timestamp are decoded.
struct RawLeaf {
    file_path: String,
    content_hash: String,
    embedding: Vec<u8>,
    tier: String,
    confidence: f64,
    tags: String,
    updated_at: String,
}

impl TryFrom<RawLeaf> for IndexEntry {
    type Error = StorageError;

    fn try_from(raw: RawLeaf) -> Result<Self> {
        let tier = raw
            .tier
            .parse::<Tier>()
            .map_err(|e| StorageError::InvalidValue(e.to_string()))?;
        let tags: Vec<String> = serde_json::from_str(&raw.tags).map_err(|e| {
            StorageError::InvalidValue(format!("tags for {}: {e}", raw.file_path))
        })?;
        Ok(Self {
            embedding: codec::deserialize(&raw.embedding)?,
            updated_at: parse_timestamp(&raw.updated_at)?,
            file_path: raw.file_path,
            content_hash: raw.content_hash,
            tier,
            confidence: raw.confidence,
            tags,
        })
    }
}

/// Confidence must be a finite value in `[0, 1]`.
pub(crate) fn check_confidence(file_path: &str, confidence: f64) -> Result<()> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(StorageError::InvalidValue(format!(
            "confidence {confidence} for {file_path} is outside [0, 1]"
        )))
    }
}

/// SQLite-backed leaf and link store.
pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    /// Open or create the store at the provided sqlite path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Insert or replace the entry for `entry.file_path`.
    pub fn upsert_leaf(&self, entry: &IndexEntry) -> Result<()> {
        check_confidence(&entry.file_path, entry.confidence)?;
        let tags = serde_json::to_string(&entry.tags)
            .map_err(|e| StorageError::InvalidValue(format!("tags: {e}")))?;
        self.conn.execute(
            "INSERT INTO leaves (
                file_path, content_hash, embedding, tier, confidence, tags, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(file_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                embedding = excluded.embedding,
                tier = excluded.tier,
                confidence = excluded.confidence,
                tags = excluded.tags,
                updated_at = excluded.updated_at",
            params![
                entry.file_path,
                entry.content_hash,
                codec::serialize(&entry.embedding),
                entry.tier.as_str(),
                entry.confidence,
                tags,
                format_timestamp(&entry.updated_at),
            ],
        )?;
        debug!(file_path = %entry.file_path, dimension = entry.embedding.len(), "Indexed leaf");
        Ok(())
    }

    pub fn get_leaf(&self, file_path: &str) -> Result<Option<IndexEntry>> {
        let raw = self
            .conn
            .query_row(
                "SELECT file_path, content_hash, embedding, tier, confidence, tags, updated_at
                 FROM leaves WHERE file_path = ?1",
                params![file_path],
                decode_leaf_row,
            )
            .optional()?;
        raw.map(IndexEntry::try_from).transpose()
    }

    /// Every indexed entry, ordered by path.
    pub fn get_all_leaves(&self) -> Result<Vec<IndexEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, content_hash, embedding, tier, confidence, tags, updated_at
             FROM leaves ORDER BY file_path",
        )?;
        let rows = stmt.query_map([], decode_leaf_row)?;
        let mut entries = Vec::new();
        for raw in rows {
            entries.push(IndexEntry::try_from(raw?)?);
        }
        Ok(entries)
    }

    pub fn leaf_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM leaves", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Remove the entry and every link touching it. Returns whether the
    /// entry existed.
    pub fn delete_leaf(&mut self, file_path: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM leaves WHERE file_path = ?1", params![file_path])?;
        let links = tx.execute(
            "DELETE FROM links WHERE from_path = ?1 OR to_path = ?1",
            params![file_path],
        )?;
        tx.commit()?;
        debug!(file_path, links_removed = links, "Deleted leaf");
        Ok(removed > 0)
    }

    /// Add a link. Returns false when the exact triple already exists.
    pub fn add_link(&self, from_path: &str, to_path: &str, relation: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO links (from_path, to_path, relation, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![from_path, to_path, relation, format_timestamp(&Utc::now())],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_links_from(&self, file_path: &str) -> Result<Vec<Link>> {
        self.query_links(
            "SELECT from_path, to_path, relation, created_at FROM links
             WHERE from_path = ?1 ORDER BY created_at, to_path, relation",
            file_path,
        )
    }

    pub fn get_links_to(&self, file_path: &str) -> Result<Vec<Link>> {
        self.query_links(
            "SELECT from_path, to_path, relation, created_at FROM links
             WHERE to_path = ?1 ORDER BY created_at, from_path, relation",
            file_path,
        )
    }

    /// Exact-match delete. Returns whether a link was removed.
    pub fn remove_link(&self, from_path: &str, to_path: &str, relation: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM links WHERE from_path = ?1 AND to_path = ?2 AND relation = ?3",
            params![from_path, to_path, relation],
        )?;
        Ok(removed > 0)
    }

    /// Empty the leaf table ahead of a full rebuild. Links are kept.
    pub fn clear_leaves(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM leaves", [])?;
        debug!(removed, "Cleared leaf index");
        Ok(removed)
    }

    fn query_links(&self, sql: &str, file_path: &str) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![file_path], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut links = Vec::new();
        for row in rows {
            let (from_path, to_path, relation, created_at) = row?;
            links.push(Link {
                from_path,
                to_path,
                relation,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(links)
    }
}

fn decode_leaf_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLeaf> {
    Ok(RawLeaf {
        file_path: row.get(0)?,
        content_hash: row.get(1)?,
        embedding: row.get(2)?,
        tier: row.get(3)?,
        confidence: row.get(4)?,
        tags: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidValue(format!("timestamp {value:?}: {e}")))
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS leaves (
    file_path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    embedding BLOB NOT NULL,
    tier TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    tags TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS links (
    from_path TEXT NOT NULL,
    to_path TEXT NOT NULL,
    relation TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_path, to_path, relation)
);

CREATE INDEX IF NOT EXISTS idx_leaves_tier ON leaves(tier);
CREATE INDEX IF NOT EXISTS idx_links_from ON links(from_path);
CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_path);
";
