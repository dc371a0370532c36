use serde::{Deserialize, Serialize};

use crate::builder::parse_id;
use crate::error::Result;
use crate::object_id::ObjectId;

/// Stored link to a document in another collection: `{"$ref": .., "$id": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "$ref")]
    pub collection: String,
    #[serde(rename = "$id")]
    pub id: ObjectId,
}

impl Reference {
    pub fn new(collection: impl Into<String>, id: ObjectId) -> Self {
        Self {
            collection: collection.into(),
            id,
        }
    }

    /// Reference from caller input. An empty string means "no reference";
    /// anything else must be a valid id or fails with `invalid <label>`.
    pub fn parse(collection: &str, raw: &str, label: &str) -> Result<Option<Self>> {
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::new(collection, parse_id(raw, label)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn wire_shape() {
        let id = ObjectId::new();
        let r = Reference::new("works", id);
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"$ref": "works", "$id": id.to_hex()})
        );
    }

    #[test]
    fn parse_input() {
        assert_eq!(Reference::parse("works", "", "workRef").unwrap(), None);
        let id = ObjectId::new();
        assert_eq!(
            Reference::parse("works", &id.to_hex(), "workRef").unwrap(),
            Some(Reference::new("works", id))
        );
        assert!(matches!(
            Reference::parse("works", "nope", "workRef"),
            Err(Error::Validation(ref m)) if m == "invalid workRef"
        ));
    }
}
