//! DocumentCodec - Entity と JSON document の相互変換

use super::entity::Entity;
use crate::error::StoreError;

/// Encodes an entity into the document stored in the `document` column.
pub fn encode<E: Entity>(entity: &E) -> Result<String, StoreError> {
    serde_json::to_string(entity).map_err(|source| StoreError::Codec {
        entity: E::NAME,
        source,
    })
}

/// Decodes a stored document back into an entity.
pub fn decode<E: Entity>(document: &str) -> Result<E, StoreError> {
    serde_json::from_str(document).map_err(|source| StoreError::Codec {
        entity: E::NAME,
        source,
    })
}
