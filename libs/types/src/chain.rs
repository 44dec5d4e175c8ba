//! Chain identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one chain tracked by the explorer, e.g. `AELF` or `tDVW`.
///
/// Treated as an opaque case-sensitive token. Ordering is lexical so that
/// merged views render side chains in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        ChainId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(id: &str) -> Self {
        ChainId::new(id)
    }
}

impl From<String> for ChainId {
    fn from(id: String) -> Self {
        ChainId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_serde() {
        let chain = ChainId::new("AELF");
        assert_eq!(chain.to_string(), "AELF");

        let json = serde_json::to_string(&chain).unwrap();
        assert_eq!(json, "\"AELF\"");
        let back: ChainId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chain);
    }

    #[test]
    fn ordering_is_lexical() {
        let mut ids = vec![ChainId::new("tDVW"), ChainId::new("AELF")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "AELF");
    }
}
