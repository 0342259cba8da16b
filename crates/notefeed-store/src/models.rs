use anyhow::{Result, anyhow};
use serde_json::Value;

use notefeed_types::Document;

/// One row of the `documents` table.
pub struct DocumentRow {
    pub collection: String,
    pub id: String,
    pub data: String,
    pub revision: i64,
}

impl DocumentRow {
    pub fn into_document(self) -> Result<Document> {
        let data = match serde_json::from_str(&self.data)? {
            Value::Object(map) => map,
            _ => return Err(anyhow!("{}/{} is not a JSON object", self.collection, self.id)),
        };
        Ok(Document::new(self.id, data).with_revision(u64::try_from(self.revision)?))
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { revision: u64 },
    Missing,
    Conflict { found: u64 },
}
