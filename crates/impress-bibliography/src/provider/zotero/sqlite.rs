//! Read access to the Zotero SQLite database
//!
//! Zotero holds an exclusive lock on `zotero.sqlite` while running, so queries
//! go against a scratch copy that is refreshed whenever the original is newer.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::BibliographyCollection;
use crate::error::ProviderError;

pub const DATABASE_FILE: &str = "zotero.sqlite";

/// A creator row, in `orderIndex` order within its item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoteroCreator {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub creator_type: String,
}

/// A regular (non-attachment, non-note) item of the user library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoteroItem {
    pub key: String,
    pub version: i64,
    pub item_type: String,
    pub fields: Vec<(String, String)>,
    pub creators: Vec<ZoteroCreator>,
    pub collection_keys: Vec<String>,
}

impl ZoteroItem {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Where the working copy for a data directory lives
pub fn scratch_copy_path(scratch_dir: &Path, data_dir: &Path) -> PathBuf {
    let hash = blake3::hash(data_dir.to_string_lossy().as_bytes());
    scratch_dir.join(format!("{}.sqlite", &hash.to_hex()[..16]))
}

/// Open a read-only connection on a fresh-enough copy of the database.
///
/// A copy that cannot be opened or queried is deleted so the next attempt
/// starts from the original again.
pub fn connect(data_dir: &Path, scratch_dir: &Path) -> Result<Connection, ProviderError> {
    let db_file = data_dir.join(DATABASE_FILE);
    let db_meta = std::fs::metadata(&db_file).map_err(|e| ProviderError::io(&db_file, e))?;

    std::fs::create_dir_all(scratch_dir).map_err(|e| ProviderError::io(scratch_dir, e))?;
    let copy_file = scratch_copy_path(scratch_dir, data_dir);

    let stale = match (std::fs::metadata(&copy_file), db_meta.modified()) {
        (Ok(copy_meta), Ok(db_modified)) => copy_meta
            .modified()
            .map(|copy_modified| copy_modified < db_modified)
            .unwrap_or(true),
        (Ok(_), Err(_)) => false,
        (Err(_), _) => true,
    };

    if stale {
        tracing::debug!("Copying {:?} to {:?}", db_file, copy_file);
        std::fs::copy(&db_file, &copy_file).map_err(|e| ProviderError::io(&copy_file, e))?;
    }

    let opened = Connection::open_with_flags(
        &copy_file,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .and_then(|conn| {
        conn.query_row("SELECT COUNT(*) FROM libraries", [], |row| row.get::<_, i64>(0))?;
        Ok(conn)
    });

    match opened {
        Ok(conn) => Ok(conn),
        Err(e) => {
            tracing::warn!("Zotero database copy unusable, removing: {}", e);
            if let Err(remove_err) = std::fs::remove_file(&copy_file) {
                tracing::warn!("Failed to remove {:?}: {}", copy_file, remove_err);
            }
            Err(e.into())
        }
    }
}

/// Highest item version in the user library, ignoring attachments and notes
pub fn library_version(conn: &Connection) -> Result<i64, ProviderError> {
    let version = conn.query_row(
        "SELECT IFNULL(MAX(items.version), 0)
         FROM items
         JOIN itemTypes ON items.itemTypeID = itemTypes.itemTypeID
         JOIN libraries ON items.libraryID = libraries.libraryID
         WHERE libraries.type = 'user'
           AND itemTypes.typeName <> 'attachment'
           AND itemTypes.typeName <> 'note'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(version)
}

pub fn read_collections(
    conn: &Connection,
    provider_key: &str,
) -> Result<Vec<BibliographyCollection>, ProviderError> {
    let mut stmt = conn.prepare(
        "SELECT collections.key, collections.collectionName, parents.key
         FROM collections
         JOIN libraries ON collections.libraryID = libraries.libraryID
         LEFT JOIN collections AS parents
           ON collections.parentCollectionID = parents.collectionID
         WHERE libraries.type = 'user'
         ORDER BY collections.collectionName, collections.key",
    )?;

    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let name: String = row.get(1)?;
        let parent: Option<String> = row.get(2)?;
        Ok(BibliographyCollection {
            name,
            key,
            provider: provider_key.to_string(),
            parent_key: parent,
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Render a cell the way Zotero shows it (values may be stored as numbers)
fn sql_text(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) => Some(s),
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(r) => Some(r.to_string()),
        SqlValue::Null | SqlValue::Blob(_) => None,
    }
}

/// All regular items of the user library with fields, creators and
/// collection memberships, ordered by item key
pub fn read_items(conn: &Connection) -> Result<Vec<ZoteroItem>, ProviderError> {
    let mut stmt = conn.prepare(
        "SELECT items.itemID, items.key, items.version, itemTypes.typeName
         FROM items
         JOIN itemTypes ON items.itemTypeID = itemTypes.itemTypeID
         JOIN libraries ON items.libraryID = libraries.libraryID
         WHERE libraries.type = 'user'
           AND itemTypes.typeName <> 'attachment'
           AND itemTypes.typeName <> 'note'
           AND items.itemID NOT IN (SELECT itemID FROM deletedItems)
         ORDER BY items.key",
    )?;
    let mut items: Vec<(i64, ZoteroItem)> = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                ZoteroItem {
                    key: row.get(1)?,
                    version: row.get(2)?,
                    item_type: row.get(3)?,
                    fields: Vec::new(),
                    creators: Vec::new(),
                    collection_keys: Vec::new(),
                },
            ))
        })?
        .collect::<Result<_, _>>()?;

    let index: HashMap<i64, usize> = items
        .iter()
        .enumerate()
        .map(|(pos, (item_id, _))| (*item_id, pos))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT itemData.itemID, fields.fieldName, itemDataValues.value
         FROM itemData
         JOIN fields ON itemData.fieldID = fields.fieldID
         JOIN itemDataValues ON itemData.valueID = itemDataValues.valueID",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let item_id: i64 = row.get(0)?;
        let Some(&pos) = index.get(&item_id) else {
            continue;
        };
        let name: String = row.get(1)?;
        if let Some(value) = sql_text(row.get(2)?) {
            items[pos].1.fields.push((name, value));
        }
    }

    let mut stmt = conn.prepare(
        "SELECT itemCreators.itemID, creators.firstName, creators.lastName,
                creatorTypes.creatorType
         FROM itemCreators
         JOIN creators ON creators.creatorID = itemCreators.creatorID
         JOIN creatorTypes ON itemCreators.creatorTypeID = creatorTypes.creatorTypeID
         ORDER BY itemCreators.itemID, itemCreators.orderIndex",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let item_id: i64 = row.get(0)?;
        let Some(&pos) = index.get(&item_id) else {
            continue;
        };
        items[pos].1.creators.push(ZoteroCreator {
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            creator_type: row.get(3)?,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT collectionItems.itemID, collections.key
         FROM collectionItems
         JOIN collections ON collectionItems.collectionID = collections.collectionID
         ORDER BY collections.key",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let item_id: i64 = row.get(0)?;
        if let Some(&pos) = index.get(&item_id) {
            items[pos].1.collection_keys.push(row.get(1)?);
        }
    }

    Ok(items.into_iter().map(|(_, item)| item).collect())
}

/// Everything a load needs from one database snapshot
#[derive(Debug, Clone)]
pub struct LibrarySnapshot {
    pub version: i64,
    pub collections: Vec<BibliographyCollection>,
    pub items: Vec<ZoteroItem>,
}

pub fn read_library(conn: &Connection, provider_key: &str) -> Result<LibrarySnapshot, ProviderError> {
    Ok(LibrarySnapshot {
        version: library_version(conn)?,
        collections: read_collections(conn, provider_key)?,
        items: read_items(conn)?,
    })
}
