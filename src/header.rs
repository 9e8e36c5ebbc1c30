//! Block headers as reported by individual nodes.

use alloy::primitives::B256;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Index of a node connection, in the order the endpoints were configured.
pub type NodeId = usize;

/// A mined block header tagged with the node that reported it.
///
/// Stores the minimal information needed to compare chains across nodes:
/// - Reporting node
/// - Block number and hash
/// - Parent hash (to inspect chain linkage in reports)
/// - Timestamp (for debugging and reports)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHeader {
    /// Node that produced or relayed this header
    pub node_id: NodeId,

    /// Block number
    pub number: u64,

    /// Block hash
    pub hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// Block timestamp
    pub timestamp: DateTime<Utc>,
}

impl NodeHeader {
    /// Create a new header record manually (useful for testing).
    #[must_use]
    pub const fn new(
        node_id: NodeId,
        number: u64,
        hash: B256,
        parent_hash: B256,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id,
            number,
            hash,
            parent_hash,
            timestamp,
        }
    }

    /// Create a header record from an Alloy RPC header received from `node_id`.
    ///
    /// Timestamps outside chrono's range fall back to the Unix epoch.
    #[must_use]
    pub fn from_rpc_header(node_id: NodeId, header: &alloy::rpc::types::Header) -> Self {
        Self {
            node_id,
            number: header.number,
            hash: header.hash,
            parent_hash: header.parent_hash,
            timestamp: unix_timestamp(header.timestamp),
        }
    }
}

/// Convert Unix epoch seconds into a UTC timestamp.
#[must_use]
pub fn unix_timestamp(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::b256;

    #[test]
    fn test_node_header_creation() {
        let header = NodeHeader::new(
            2,
            19_000_000,
            b256!("0x1234567890123456789012345678901234567890123456789012345678901234"),
            b256!("0xabcdefabcdefabcdefabcdefabcdefabcdefabcdefabcdefabcdefabcdefabcd"),
            unix_timestamp(1_234_567_890),
        );

        assert_eq!(header.node_id, 2);
        assert_eq!(header.number, 19_000_000);
        assert_eq!(header.timestamp.timestamp(), 1_234_567_890);
    }

    #[test]
    fn test_unix_timestamp_out_of_range() {
        assert_eq!(unix_timestamp(u64::MAX), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_node_header_serialization() {
        let header = NodeHeader::new(
            0,
            42,
            b256!("0x1111111111111111111111111111111111111111111111111111111111111111"),
            b256!("0x2222222222222222222222222222222222222222222222222222222222222222"),
            unix_timestamp(1_700_000_000),
        );

        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"node_id\":0"));
        assert!(json.contains("0x1111111111111111111111111111111111111111111111111111111111111111"));

        let decoded: NodeHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, header);
    }
}
