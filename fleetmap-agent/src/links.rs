//! TCP latency probes to peer nodes
//!
//! Peers come from FLEETMAP_AGENT_PEERS, a comma separated list of
//! `name=host:port` entries. Each cycle opens a few TCP connections per peer
//! and reports avg/min/max connect latency. Unreachable peers produce no
//! sample at all - the aggregator only ever sees measured links.

use serde::Serialize;
use std::time::Instant;
use tokio::net::TcpStream;
use tracing::debug;

const PROBES_PER_PEER: usize = 3;
const PROBE_TIMEOUT_SECS: u64 = 2;

/// One latency measurement toward a peer, as the aggregator expects it.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSample {
    pub target_node: String,
    pub target_ip: Option<String>,
    pub latency_ms: f64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerTarget {
    pub name: String,
    pub addr: String,
}

/// Parse `name=host:port,name=host:port`. Malformed entries are skipped.
pub fn parse_peers(raw: &str) -> Vec<PeerTarget> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (name, addr) = entry.split_once('=')?;
            if name.is_empty() || addr.is_empty() {
                return None;
            }
            Some(PeerTarget {
                name: name.trim().to_string(),
                addr: addr.trim().to_string(),
            })
        })
        .collect()
}

pub async fn probe_peers(peers: &[PeerTarget]) -> Vec<LinkSample> {
    let mut samples = Vec::new();
    for peer in peers {
        if let Some(sample) = probe_peer(peer).await {
            samples.push(sample);
        } else {
            debug!("peer {} ({}) unreachable, no sample", peer.name, peer.addr);
        }
    }
    samples
}

async fn probe_peer(peer: &PeerTarget) -> Option<LinkSample> {
    let mut measured: Vec<f64> = Vec::with_capacity(PROBES_PER_PEER);
    for _ in 0..PROBES_PER_PEER {
        if let Some(ms) = probe_once(&peer.addr).await {
            measured.push(ms);
        }
    }
    if measured.is_empty() {
        return None;
    }
    let avg = measured.iter().sum::<f64>() / measured.len() as f64;
    let min = measured.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = measured.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let target_ip = peer.addr.rsplit_once(':').map(|(host, _)| host.to_string());
    Some(LinkSample {
        target_node: peer.name.clone(),
        target_ip,
        latency_ms: avg,
        min_ms: Some(min),
        max_ms: Some(max),
    })
}

async fn probe_once(addr: &str) -> Option<f64> {
    let started = Instant::now();
    let connect = TcpStream::connect(addr);
    match tokio::time::timeout(std::time::Duration::from_secs(PROBE_TIMEOUT_SECS), connect).await {
        Ok(Ok(_stream)) => Some(started.elapsed().as_secs_f64() * 1000.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peers() {
        let peers = parse_peers("jim-pi=10.0.0.2:22, toby-gcp1=34.1.2.3:8000");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].name, "jim-pi");
        assert_eq!(peers[0].addr, "10.0.0.2:22");
        assert_eq!(peers[1].name, "toby-gcp1");
    }

    #[test]
    fn test_parse_peers_skips_malformed_entries() {
        let peers = parse_peers("good=1.2.3.4:22,broken,=:22,also-bad=,");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "good");
    }

    #[tokio::test]
    async fn test_probe_measures_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let peer = PeerTarget { name: "local".to_string(), addr };

        let samples = probe_peers(std::slice::from_ref(&peer)).await;
        assert_eq!(samples.len(), 1);
        let sample = &samples[0];
        assert_eq!(sample.target_node, "local");
        assert!(sample.latency_ms >= 0.0);
        assert!(sample.min_ms.unwrap() <= sample.max_ms.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_peer_yields_no_sample() {
        // Reserved TEST-NET-1 address, nothing listens there
        let peer = PeerTarget {
            name: "ghost".to_string(),
            addr: "192.0.2.1:9".to_string(),
        };
        let samples = probe_peers(std::slice::from_ref(&peer)).await;
        assert!(samples.is_empty());
    }
}
