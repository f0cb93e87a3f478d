//! Opaque pagination cursors for progressive graph expansion.
//!
//! A cursor is a base64url-encoded JSON object. Clients must treat it as
//! opaque; we only guarantee that a cursor we emit can be fed back into the
//! same or a later server version.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::Address;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphCursor {
    pub center_address: Address,
    pub current_depth: u32,
    #[serde(default)]
    pub last_nodes: Vec<Address>,
    #[serde(default)]
    pub exclude_nodes: Vec<Address>,
}

impl GraphCursor {
    pub fn initial(center_address: Address) -> Self {
        Self {
            center_address,
            current_depth: 0,
            last_nodes: Vec::new(),
            exclude_nodes: Vec::new(),
        }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("GraphCursor always serializes");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes a cursor previously produced by [`GraphCursor::encode`]. As a
    /// convenience, a bare address (no base64/JSON framing at all) is accepted
    /// as shorthand for `GraphCursor::initial(address)`, which lets a caller
    /// pass either a fresh address or a `nextCursor` value to the same field.
    pub fn decode(raw: &str) -> Result<Self, AppError> {
        if let Ok(address) = Address::parse(raw) {
            return Ok(Self::initial(address));
        }

        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| AppError::InvalidCursor)?;
        serde_json::from_slice(&bytes).map_err(|e| AppError::InvalidCursorData {
            reason: e.to_string(),
        })
    }

    pub fn advance(&self, newly_visited: impl IntoIterator<Item = Address>) -> Self {
        let mut exclude_nodes = self.exclude_nodes.clone();
        exclude_nodes.extend(self.last_nodes.iter().cloned());
        let last_nodes: Vec<Address> = newly_visited.into_iter().collect();
        Self {
            center_address: self.center_address.clone(),
            current_depth: self.current_depth + 1,
            last_nodes,
            exclude_nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(c: char) -> Address {
        Address::parse(&c.to_string().repeat(48)).unwrap()
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let cursor = GraphCursor::initial(addr('A'));
        let encoded = cursor.encode();
        let decoded = GraphCursor::decode(&encoded).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn bare_address_is_accepted_as_initial_cursor() {
        let address = addr('B');
        let decoded = GraphCursor::decode(address.as_str()).unwrap();
        assert_eq!(decoded, GraphCursor::initial(address));
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(GraphCursor::decode("not-valid-base64!!!").is_err());
    }

    #[test]
    fn advance_folds_last_nodes_into_excluded_set() {
        let cursor = GraphCursor::initial(addr('A')).advance([addr('B'), addr('C')]);
        assert_eq!(cursor.current_depth, 1);
        assert_eq!(cursor.last_nodes, vec![addr('B'), addr('C')]);
        assert!(cursor.exclude_nodes.is_empty());

        let next = cursor.advance([addr('D')]);
        assert_eq!(next.current_depth, 2);
        assert_eq!(next.exclude_nodes, vec![addr('B'), addr('C')]);
        assert_eq!(next.last_nodes, vec![addr('D')]);
    }
}
