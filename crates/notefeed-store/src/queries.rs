use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::debug;

use notefeed_types::{Direction, Document, OrderSpec};

use crate::SqliteStore;
use crate::models::{DocumentRow, WriteOutcome};

impl SqliteStore {
    /// Insert a document under a caller-chosen id.
    pub fn insert_document(&self, collection: &str, id: &str, data: &Map<String, Value>) -> Result<()> {
        let body = serde_json::to_string(data)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
                (collection, id, &body),
            )?;
            self.inner.watchers.notify(conn, collection);
            Ok(())
        })
    }

    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.with_conn(|conn| query_document(conn, collection, id))
    }

    /// Merge `fields` into the top level of a document and bump its revision.
    /// With `expected_revision` set, nothing is written unless it matches.
    pub fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: &Map<String, Value>,
        expected_revision: Option<u64>,
    ) -> Result<WriteOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let current: Option<(String, i64)> = tx
                .query_row(
                    "SELECT data, revision FROM documents WHERE collection = ?1 AND id = ?2",
                    (collection, id),
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((body, revision)) = current else {
                return Ok(WriteOutcome::Missing);
            };
            let found = u64::try_from(revision)?;
            if expected_revision.is_some_and(|expected| expected != found) {
                return Ok(WriteOutcome::Conflict { found });
            }

            let mut data = match serde_json::from_str(&body)? {
                Value::Object(map) => map,
                _ => return Err(anyhow!("{}/{} is not a JSON object", collection, id)),
            };
            for (field, value) in fields {
                data.insert(field.clone(), value.clone());
            }

            let next = found + 1;
            tx.execute(
                "UPDATE documents SET data = ?1, revision = ?2 WHERE collection = ?3 AND id = ?4",
                (serde_json::to_string(&data)?, i64::try_from(next)?, collection, id),
            )?;
            tx.commit()?;

            self.inner.watchers.notify(conn, collection);
            Ok(WriteOutcome::Written { revision: next })
        })
    }

    /// Returns whether a document was removed.
    pub fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                (collection, id),
            )?;
            if removed > 0 {
                self.inner.watchers.notify(conn, collection);
            }
            Ok(removed > 0)
        })
    }
}

fn document_row(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        collection: row.get(0)?,
        id: row.get(1)?,
        data: row.get(2)?,
        revision: row.get(3)?,
    })
}

pub(crate) fn query_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let mut stmt = conn.prepare(
        "SELECT collection, id, data, revision
         FROM documents
         WHERE collection = ?1 AND id = ?2",
    )?;

    stmt.query_row((collection, id), document_row)
        .optional()?
        .map(DocumentRow::into_document)
        .transpose()
}

/// Every document of `collection`, ordered by a top-level field of the JSON
/// body. Documents lacking the field sort as NULL; ties fall back to the id.
pub(crate) fn query_documents(conn: &Connection, collection: &str, order: &OrderSpec) -> Result<Vec<Document>> {
    check_field_name(&order.field)?;
    let direction = match order.direction {
        Direction::Ascending => "ASC",
        Direction::Descending => "DESC",
    };
    let sql = format!(
        "SELECT collection, id, data, revision
         FROM documents
         WHERE collection = ?1
         ORDER BY json_extract(data, '$.{}') {}, id ASC",
        order.field, direction
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([collection], document_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut docs = Vec::with_capacity(rows.len());
    for row in rows {
        let (collection, id) = (row.collection.clone(), row.id.clone());
        match row.into_document() {
            Ok(doc) => docs.push(doc),
            Err(e) => debug!("Skipping unreadable document {}/{}: {}", collection, id, e),
        }
    }
    Ok(docs)
}

/// Order fields are spliced into SQL, so only plain identifiers pass.
pub(crate) fn check_field_name(field: &str) -> Result<()> {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(anyhow!("invalid order field: {:?}", field))
    }
}
