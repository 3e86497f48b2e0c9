//! Producer identity of an ingest call.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

pub const UNKNOWN_PRODUCER: &str = "unknown-simulator";

/// Who is streaming into the hub, and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub producer_id: String,
    pub peer: Option<String>,
}

impl ProducerInfo {
    /// Use the `simulator-id` header when present, otherwise derive an id
    /// from the peer address.
    pub fn resolve(header: Option<&str>, peer: Option<&str>) -> Self {
        let producer_id = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| producer_id_from_peer(peer));
        Self {
            producer_id,
            peer: peer.map(str::to_string),
        }
    }
}

/// Derive a producer id from a peer address string.
///
/// `ip:port` peers map to `simulator-port-<port>`; anything else maps to a
/// four-digit hash. The result is stable for one connection only, since the
/// ephemeral port changes on reconnect.
pub fn producer_id_from_peer(peer: Option<&str>) -> String {
    let Some(peer) = peer.map(str::trim).filter(|p| !p.is_empty()) else {
        return UNKNOWN_PRODUCER.to_string();
    };

    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return format!("simulator-port-{}", addr.port());
    }

    let mut hasher = DefaultHasher::new();
    peer.hash(&mut hasher);
    format!("simulator-{:04}", hasher.finish() % 10_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_wins() {
        let info = ProducerInfo::resolve(Some("Simulator-2"), Some("127.0.0.1:40000"));
        assert_eq!(info.producer_id, "Simulator-2");
        assert_eq!(info.peer.as_deref(), Some("127.0.0.1:40000"));
    }

    #[test]
    fn test_blank_header_falls_back_to_peer_port() {
        let info = ProducerInfo::resolve(Some("  "), Some("127.0.0.1:40000"));
        assert_eq!(info.producer_id, "simulator-port-40000");

        let v6 = ProducerInfo::resolve(None, Some("[::1]:51234"));
        assert_eq!(v6.producer_id, "simulator-port-51234");
    }

    #[test]
    fn test_opaque_peer_hashes_deterministically() {
        let a = producer_id_from_peer(Some("unix:/run/hub.sock"));
        let b = producer_id_from_peer(Some("unix:/run/hub.sock"));
        assert_eq!(a, b);
        assert!(a.starts_with("simulator-"));
        assert_eq!(a.len(), "simulator-".len() + 4);
    }

    #[test]
    fn test_no_peer() {
        assert_eq!(producer_id_from_peer(None), UNKNOWN_PRODUCER);
        assert_eq!(ProducerInfo::resolve(None, None).producer_id, UNKNOWN_PRODUCER);
    }
}
