//! Normalisation of backend-reported candidates before they enter SDP.
//!
//! Older media backends misreport some TCP candidates as UDP and advertise
//! TCP-active candidates with port 0; relay candidates may lack base ports.
//! These repairs keep the emitted SDP acceptable to deployed servers.

use std::collections::HashMap;

use crate::calling::sdp::{sort_candidates, Candidate, CandidateType, TransportProtocol};

/// Drop UDP candidate pairs that are really mistagged TCP candidates: two
/// candidates sharing a foundation whose ports match, or whose base ports
/// match on a non-host candidate.
pub fn remove_mistagged_tcp_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut by_foundation: HashMap<String, usize> = HashMap::new();
    let mut dropped: Vec<usize> = Vec::new();

    for candidate in candidates {
        if candidate.protocol != TransportProtocol::Udp {
            kept.push(candidate);
            continue;
        }

        match by_foundation.get(&candidate.foundation) {
            Some(&earlier) if !dropped.contains(&earlier) => {
                let other = &kept[earlier];
                let same_port = other.port == candidate.port;
                let same_base = candidate.kind != CandidateType::Host
                    && other.base_port == candidate.base_port;
                if same_port || same_base {
                    tracing::debug!(
                        "Dropping mistagged TCP candidate pair with foundation {}",
                        candidate.foundation
                    );
                    dropped.push(earlier);
                    continue;
                }
                kept.push(candidate);
            }
            _ => {
                by_foundation.insert(candidate.foundation.clone(), kept.len());
                kept.push(candidate);
            }
        }
    }

    let mut result = Vec::with_capacity(kept.len());
    for (i, candidate) in kept.into_iter().enumerate() {
        if !dropped.contains(&i) {
            result.push(candidate);
        }
    }
    result
}

/// Drop IPv6 candidates and apply the stable (foundation, username,
/// component) ordering. IPv6 literals are never emitted on the wire.
pub fn drop_ipv6_and_sort(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut result: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| {
            let v6 = c.ip.is_empty() || c.ip.contains(':') || c.base_ip.contains(':');
            if v6 {
                tracing::debug!("Ignoring IPv6 candidate {} {}", c.foundation, c.ip);
            }
            !v6
        })
        .collect();
    sort_candidates(&mut result);
    result
}

/// Fill the zero ports of TCP-active candidates from their TCP-passive
/// siblings (same type, IP and base IP), then fill missing base ports of
/// relay candidates from host candidates on the same base IP.
pub fn repair_tcp_ports(candidates: &mut [Candidate]) {
    let mut host_ip_to_port: HashMap<String, u16> = HashMap::new();
    for candidate in candidates.iter() {
        if candidate.protocol == TransportProtocol::TcpPassive
            && candidate.kind == CandidateType::Host
        {
            host_ip_to_port.insert(candidate.ip.clone(), candidate.port);
        }
    }

    for i in 0..candidates.len() {
        if candidates[i].protocol != TransportProtocol::TcpActive {
            continue;
        }
        let passive = candidates.iter().find(|passive| {
            passive.protocol == TransportProtocol::TcpPassive
                && passive.kind == candidates[i].kind
                && passive.ip == candidates[i].ip
                && passive.base_ip == candidates[i].base_ip
        });
        if let Some(passive) = passive {
            let (port, base_port) = (passive.port, passive.base_port);
            if candidates[i].port == 0 {
                candidates[i].port = port;
            }
            if candidates[i].base_port == 0 {
                candidates[i].base_port = base_port;
            }
        }
    }

    for candidate in candidates.iter_mut() {
        if candidate.kind == CandidateType::Relay && candidate.base_port == 0 {
            match host_ip_to_port.get(&candidate.base_ip) {
                Some(&port) => candidate.base_port = port,
                None => tracing::warn!(
                    "Couldn't determine base port for candidate with foundation {}",
                    candidate.foundation
                ),
            }
        }
    }
}
