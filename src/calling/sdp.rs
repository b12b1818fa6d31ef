//! SDP model, parser and serialiser for the Lync dialect.
//!
//! Covers the subset the servers actually exchange: one session block plus
//! one media block per stream, ICE candidates in both the draft-6 and
//! RFC 5245 wire formats, the `a=crypto` SRTP key attribute and the
//! deployment quirks (duplicate payload ids, failed sections echoed with
//! port 0).

use anyhow::{bail, Context, Result};
use base64::Engine;

use crate::backend::{IceVersion, MediaType, SRTP_KEY_LEN};

/// RTP component of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Component {
    Rtp = 1,
    Rtcp = 2,
}

impl Component {
    fn from_number(n: u32) -> Option<Self> {
        match n {
            1 => Some(Component::Rtp),
            2 => Some(Component::Rtcp),
            _ => None,
        }
    }
}

/// ICE candidate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    Relay,
    ServerReflexive,
    PeerReflexive,
}

impl CandidateType {
    fn token(self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Relay => "relay",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "host" => Some(CandidateType::Host),
            "relay" => Some(CandidateType::Relay),
            "srflx" => Some(CandidateType::ServerReflexive),
            "prflx" => Some(CandidateType::PeerReflexive),
            _ => None,
        }
    }
}

/// Candidate transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Udp,
    TcpPassive,
    TcpActive,
}

impl TransportProtocol {
    fn token(self) -> &'static str {
        match self {
            TransportProtocol::Udp => "UDP",
            TransportProtocol::TcpPassive => "TCP-PASS",
            TransportProtocol::TcpActive => "TCP-ACT",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "UDP" => Some(TransportProtocol::Udp),
            "TCP-PASS" => Some(TransportProtocol::TcpPassive),
            "TCP-ACT" => Some(TransportProtocol::TcpActive),
            _ => None,
        }
    }
}

/// One ICE candidate, shared between the backend boundary and the SDP model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub foundation: String,
    pub component: Component,
    pub kind: CandidateType,
    pub protocol: TransportProtocol,
    pub ip: String,
    pub port: u16,
    pub base_ip: String,
    pub base_port: u16,
    pub priority: u32,
    pub username: String,
    pub password: String,
}

/// One codec entry of a media section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    /// RTP payload id.
    pub id: u32,
    pub name: String,
    pub clock_rate: u32,
    pub media_type: MediaType,
    /// Free-form `a=fmtp` parameters in order.
    pub parameters: Vec<(String, String)>,
}

/// One media section.
#[derive(Debug, Clone, PartialEq)]
pub struct SdpMedia {
    /// Section name: `audio`, `video`, `data` or `applicationsharing`.
    pub name: String,
    pub port: u16,
    pub ip: String,
    pub codecs: Vec<Codec>,
    pub candidates: Vec<Candidate>,
    pub remote_candidates: Vec<Candidate>,
    /// Attribute name/value pairs in insertion order; flag attributes have an
    /// empty value.
    pub attributes: Vec<(String, String)>,
    /// 30-byte SRTP master key, when the peer (or we) offered one.
    pub encryption_key: Option<Vec<u8>>,
    pub encryption_key_id: u32,
    /// Serialised as the RTP/SAVP profile.
    pub encryption_active: bool,
}

impl SdpMedia {
    pub fn new(name: &str) -> Self {
        SdpMedia {
            name: name.to_string(),
            port: 0,
            ip: String::new(),
            codecs: Vec::new(),
            candidates: Vec::new(),
            remote_candidates: Vec::new(),
            attributes: Vec::new(),
            encryption_key: None,
            encryption_key_id: 0,
            encryption_active: false,
        }
    }

    /// First value of the named attribute, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A whole SDP body.
#[derive(Debug, Clone, PartialEq)]
pub struct SdpMessage {
    /// Session-level connection IP.
    pub ip: String,
    pub ice_version: IceVersion,
    pub media: Vec<SdpMedia>,
}

/// Media type for an SDP section name; `None` for names we cannot carry.
pub fn media_type_for_section(name: &str) -> Option<MediaType> {
    match name {
        "audio" => Some(MediaType::Audio),
        "video" => Some(MediaType::Video),
        "data" | "applicationsharing" => Some(MediaType::Application),
        _ => None,
    }
}

/// Insert a codec keeping the list sorted by payload id, dropping duplicates.
/// Buggy backends report non-unique ids that must never reach the wire.
pub fn insert_codec_unique_sorted(codecs: &mut Vec<Codec>, codec: Codec) {
    match codecs.binary_search_by_key(&codec.id, |c| c.id) {
        Ok(_) => {}
        Err(pos) => codecs.insert(pos, codec),
    }
}

/// Stable candidate ordering: (foundation, username, component).
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.foundation
            .cmp(&b.foundation)
            .then_with(|| a.username.cmp(&b.username))
            .then_with(|| a.component.cmp(&b.component))
    });
}

/// Pick the section's connection IP and RTP/RTCP ports from a candidate
/// list. Only candidates of `kind` are considered (`None` matches all); once
/// an IP is chosen, candidates on other IPs are skipped. The scan stops when
/// both ports are known.
pub fn select_endpoint(
    candidates: &[Candidate],
    kind: Option<CandidateType>,
) -> (Option<String>, u16, u16) {
    let mut ip: Option<String> = None;
    let mut rtp_port = 0;
    let mut rtcp_port = 0;

    for candidate in candidates {
        if kind.map_or(true, |k| candidate.kind == k) {
            match &ip {
                None => ip = Some(candidate.ip.clone()),
                Some(chosen) if *chosen != candidate.ip => continue,
                _ => {}
            }

            match candidate.component {
                Component::Rtp => rtp_port = candidate.port,
                Component::Rtcp => rtcp_port = candidate.port,
            }
        }

        if rtp_port != 0 && rtcp_port != 0 {
            break;
        }
    }

    (ip, rtp_port, rtcp_port)
}

/// Generate a fresh 30-byte SRTP master key from the OS CSPRNG.
pub fn generate_srtp_key() -> [u8; SRTP_KEY_LEN] {
    rand_bytes()
}

/// Cryptographically secure random bytes via the OS CSPRNG.
pub(crate) fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).expect("OS CSPRNG failed");
    buf
}

pub(crate) fn rand_u32() -> u32 {
    u32::from_be_bytes(rand_bytes())
}

// ---------------------------------------------------------------------------
// Serialisation
// ---------------------------------------------------------------------------

impl SdpMessage {
    pub fn serialize(&self) -> String {
        let mut sdp = String::new();

        sdp.push_str("v=0\r\n");
        sdp.push_str(&format!("o=- 0 0 IN IP4 {}\r\n", self.ip));
        sdp.push_str("s=session\r\n");
        sdp.push_str(&format!("c=IN IP4 {}\r\n", self.ip));
        sdp.push_str("b=CT:99980\r\n");
        sdp.push_str("t=0 0\r\n");

        for media in &self.media {
            media_to_string(&mut sdp, media, self.ice_version);
        }

        sdp
    }
}

fn media_to_string(sdp: &mut String, media: &SdpMedia, ice_version: IceVersion) {
    let profile = if media.encryption_active {
        "RTP/SAVP"
    } else {
        "RTP/AVP"
    };

    let mut ids = String::new();
    for codec in &media.codecs {
        ids.push_str(&format!(" {}", codec.id));
    }
    sdp.push_str(&format!(
        "m={} {} {}{}\r\n",
        media.name, media.port, profile, ids
    ));

    if !media.ip.is_empty() {
        sdp.push_str(&format!("c=IN IP4 {}\r\n", media.ip));
    }

    for candidate in &media.candidates {
        if candidate.ip.contains(':') {
            continue;
        }
        sdp.push_str(&format!(
            "a=candidate:{}\r\n",
            candidate_to_string(candidate, ice_version)
        ));
    }
    for candidate in &media.remote_candidates {
        if candidate.ip.contains(':') {
            continue;
        }
        sdp.push_str(&format!(
            "a=remote-candidate:{}\r\n",
            candidate_to_string(candidate, ice_version)
        ));
    }

    if ice_version == IceVersion::Rfc5245 {
        if let Some(candidate) = media.candidates.iter().find(|c| !c.username.is_empty()) {
            sdp.push_str(&format!("a=ice-ufrag:{}\r\n", candidate.username));
            sdp.push_str(&format!("a=ice-pwd:{}\r\n", candidate.password));
        }
    }

    if let Some(key) = &media.encryption_key {
        sdp.push_str(&format!(
            "a=crypto:{} AES_CM_128_HMAC_SHA1_80 inline:{}|2^31\r\n",
            media.encryption_key_id,
            base64::engine::general_purpose::STANDARD.encode(key)
        ));
    }

    for codec in &media.codecs {
        sdp.push_str(&format!(
            "a=rtpmap:{} {}/{}\r\n",
            codec.id, codec.name, codec.clock_rate
        ));
        if !codec.parameters.is_empty() {
            let params: Vec<String> = codec
                .parameters
                .iter()
                .map(|(name, value)| {
                    if value.is_empty() {
                        name.clone()
                    } else {
                        format!("{}={}", name, value)
                    }
                })
                .collect();
            sdp.push_str(&format!("a=fmtp:{} {}\r\n", codec.id, params.join(";")));
        }
    }

    for (name, value) in &media.attributes {
        if value.is_empty() {
            sdp.push_str(&format!("a={}\r\n", name));
        } else {
            sdp.push_str(&format!("a={}:{}\r\n", name, value));
        }
    }
}

fn candidate_to_string(candidate: &Candidate, ice_version: IceVersion) -> String {
    match ice_version {
        IceVersion::Rfc5245 => {
            let mut line = format!(
                "{} {} {} {} {} {} typ {}",
                candidate.foundation,
                candidate.component as u32,
                candidate.protocol.token(),
                candidate.priority,
                candidate.ip,
                candidate.port,
                candidate.kind.token()
            );
            if candidate.kind != CandidateType::Host && !candidate.base_ip.is_empty() {
                line.push_str(&format!(
                    " raddr {} rport {}",
                    candidate.base_ip, candidate.base_port
                ));
            }
            line
        }
        IceVersion::Draft6 => format!(
            "{} {} {} {} {} {} {}",
            candidate.username,
            candidate.component as u32,
            candidate.password,
            candidate.protocol.token(),
            candidate.priority,
            candidate.ip,
            candidate.port
        ),
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct SectionCreds {
    ufrag: Option<String>,
    pwd: Option<String>,
}

/// Parse an SDP body. Fails when the body carries no media section or no
/// usable connection address.
pub fn parse(body: &str) -> Result<SdpMessage> {
    let mut session_ip = String::new();
    // Legacy peers may omit candidates entirely; assume RFC 5245 then.
    let mut ice_version = IceVersion::Rfc5245;
    let mut media: Vec<SdpMedia> = Vec::new();
    let mut session_creds = SectionCreds {
        ufrag: None,
        pwd: None,
    };
    let mut creds = SectionCreds {
        ufrag: None,
        pwd: None,
    };

    for line in body.lines() {
        let line = line.trim_end();
        if line.len() < 2 || line.as_bytes()[1] != b'=' {
            continue;
        }
        let value = &line[2..];

        match line.as_bytes()[0] {
            b'o' => {
                if session_ip.is_empty() {
                    if let Some(ip) = value.split_whitespace().last() {
                        session_ip = ip.to_string();
                    }
                }
            }
            b'c' => {
                let ip = value
                    .split_whitespace()
                    .nth(2)
                    .unwrap_or_default()
                    .to_string();
                match media.last_mut() {
                    Some(section) => section.ip = ip,
                    None => session_ip = ip,
                }
            }
            b'm' => {
                if let Some(section) = media.last_mut() {
                    apply_section_creds(section, &creds, &session_creds);
                }
                creds = SectionCreds {
                    ufrag: None,
                    pwd: None,
                };

                let mut parts = value.split_whitespace();
                let name = parts.next().context("m= line without media name")?;
                let port: u16 = parts
                    .next()
                    .context("m= line without port")?
                    .parse()
                    .context("bad m= port")?;
                let profile = parts.next().unwrap_or("RTP/AVP");

                let mut section = SdpMedia::new(name);
                section.port = port;
                section.encryption_active = profile == "RTP/SAVP";
                media.push(section);
            }
            b'a' => {
                let Some(section) = media.last_mut() else {
                    // Session-level attributes: only ICE credentials matter.
                    if let Some(v) = value.strip_prefix("ice-ufrag:") {
                        session_creds.ufrag = Some(v.to_string());
                    } else if let Some(v) = value.strip_prefix("ice-pwd:") {
                        session_creds.pwd = Some(v.to_string());
                    }
                    continue;
                };

                if let Some(v) = value.strip_prefix("candidate:") {
                    if let Some((candidate, version)) = parse_candidate(v) {
                        ice_version = version;
                        section.candidates.push(candidate);
                    }
                } else if let Some(v) = value
                    .strip_prefix("remote-candidate:")
                    .or_else(|| value.strip_prefix("remote-candidates:"))
                {
                    if let Some((candidate, _)) = parse_candidate(v) {
                        section.remote_candidates.push(candidate);
                    }
                } else if let Some(v) = value.strip_prefix("ice-ufrag:") {
                    creds.ufrag = Some(v.to_string());
                } else if let Some(v) = value.strip_prefix("ice-pwd:") {
                    creds.pwd = Some(v.to_string());
                } else if let Some(v) = value.strip_prefix("rtpmap:") {
                    if let Some(codec) = parse_rtpmap(v, &section.name) {
                        insert_codec_unique_sorted(&mut section.codecs, codec);
                    }
                } else if let Some(v) = value.strip_prefix("fmtp:") {
                    parse_fmtp(v, &mut section.codecs);
                } else if let Some(v) = value.strip_prefix("crypto:") {
                    if let Some((key_id, key)) = parse_crypto(v) {
                        section.encryption_key = Some(key);
                        section.encryption_key_id = key_id;
                    }
                } else {
                    match value.split_once(':') {
                        Some((name, v)) => section
                            .attributes
                            .push((name.to_string(), v.to_string())),
                        None => section.attributes.push((value.to_string(), String::new())),
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(section) = media.last_mut() {
        apply_section_creds(section, &creds, &session_creds);
    }

    if media.is_empty() {
        bail!("SDP body carries no media section");
    }
    if session_ip.is_empty() && media.iter().all(|m| m.ip.is_empty()) {
        bail!("SDP body carries no connection address");
    }

    Ok(SdpMessage {
        ip: session_ip,
        ice_version,
        media,
    })
}

fn apply_section_creds(section: &mut SdpMedia, creds: &SectionCreds, session: &SectionCreds) {
    let ufrag = creds.ufrag.as_ref().or(session.ufrag.as_ref());
    let pwd = creds.pwd.as_ref().or(session.pwd.as_ref());
    for candidate in &mut section.candidates {
        if candidate.username.is_empty() {
            if let Some(ufrag) = ufrag {
                candidate.username = ufrag.clone();
            }
            if let Some(pwd) = pwd {
                candidate.password = pwd.clone();
            }
        }
    }
}

/// Parse the value of an `a=candidate:` line in either ICE dialect; the
/// RFC 5245 format is recognised by its ` typ ` keyword.
fn parse_candidate(value: &str) -> Option<(Candidate, IceVersion)> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() >= 8 && parts[6] == "typ" {
        let mut candidate = Candidate {
            foundation: parts[0].to_string(),
            component: Component::from_number(parts[1].parse().ok()?)?,
            protocol: TransportProtocol::from_token(parts[2])?,
            priority: parts[3].parse().ok()?,
            ip: parts[4].to_string(),
            port: parts[5].parse().ok()?,
            kind: CandidateType::from_token(parts[7])?,
            base_ip: String::new(),
            base_port: 0,
            username: String::new(),
            password: String::new(),
        };
        let mut i = 8;
        while i + 1 < parts.len() {
            match parts[i] {
                "raddr" => candidate.base_ip = parts[i + 1].to_string(),
                "rport" => candidate.base_port = parts[i + 1].parse().unwrap_or(0),
                _ => {}
            }
            i += 2;
        }
        Some((candidate, IceVersion::Rfc5245))
    } else if parts.len() >= 7 {
        let candidate = Candidate {
            username: parts[0].to_string(),
            component: Component::from_number(parts[1].parse().ok()?)?,
            password: parts[2].to_string(),
            protocol: TransportProtocol::from_token(parts[3])?,
            priority: parts[4].parse().ok()?,
            ip: parts[5].to_string(),
            port: parts[6].parse().ok()?,
            // draft-6 lines carry no type; the backend treats them all alike.
            kind: CandidateType::Host,
            foundation: String::new(),
            base_ip: String::new(),
            base_port: 0,
        };
        Some((candidate, IceVersion::Draft6))
    } else {
        None
    }
}

fn parse_rtpmap(value: &str, section_name: &str) -> Option<Codec> {
    let (id, rest) = value.split_once(' ')?;
    let (name, clock_rate) = rest.split_once('/')?;
    Some(Codec {
        id: id.parse().ok()?,
        name: name.to_string(),
        // Some rtpmaps carry a channel count after the rate.
        clock_rate: clock_rate.split('/').next()?.parse().ok()?,
        media_type: media_type_for_section(section_name).unwrap_or(MediaType::Application),
        parameters: Vec::new(),
    })
}

fn parse_fmtp(value: &str, codecs: &mut [Codec]) {
    let Some((id, params)) = value.split_once(' ') else {
        return;
    };
    let Ok(id) = id.parse::<u32>() else {
        return;
    };
    let Some(codec) = codecs.iter_mut().find(|c| c.id == id) else {
        return;
    };
    for param in params.split(';') {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        match param.split_once('=') {
            Some((name, value)) => codec
                .parameters
                .push((name.to_string(), value.to_string())),
            None => codec.parameters.push((param.to_string(), String::new())),
        }
    }
}

/// `a=crypto:<tag> <suite> inline:<base64-key>[|...]` — returns the key id
/// and the decoded 30-byte key, or `None` when the line is unusable.
fn parse_crypto(value: &str) -> Option<(u32, Vec<u8>)> {
    let mut parts = value.split_whitespace();
    let key_id: u32 = parts.next()?.parse().ok()?;
    let _suite = parts.next()?;
    let inline = parts.next()?.strip_prefix("inline:")?;
    let b64 = inline.split('|').next()?;
    let key = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
    if key.len() != SRTP_KEY_LEN {
        return None;
    }
    Some((key_id, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_candidate(foundation: &str, component: Component, ip: &str, port: u16) -> Candidate {
        Candidate {
            foundation: foundation.to_string(),
            component,
            kind: CandidateType::Host,
            protocol: TransportProtocol::Udp,
            ip: ip.to_string(),
            port,
            base_ip: ip.to_string(),
            base_port: port,
            priority: 2130706431,
            username: "d3sA".to_string(),
            password: "secretpassword1234567890".to_string(),
        }
    }

    #[test]
    fn test_parse_basic_offer() {
        let body = "\
v=0\r\n\
o=- 0 0 IN IP4 10.0.0.1\r\n\
s=session\r\n\
c=IN IP4 10.0.0.1\r\n\
b=CT:99980\r\n\
t=0 0\r\n\
m=audio 21730 RTP/AVP 0 8\r\n\
a=ice-ufrag:d3sA\r\n\
a=ice-pwd:somepassword\r\n\
a=candidate:1 1 UDP 2130706431 10.0.0.1 21730 typ host\r\n\
a=candidate:1 2 UDP 2130706430 10.0.0.1 21731 typ host\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
a=rtcp:21731\r\n";

        let msg = parse(body).unwrap();
        assert_eq!(msg.ip, "10.0.0.1");
        assert_eq!(msg.ice_version, IceVersion::Rfc5245);
        assert_eq!(msg.media.len(), 1);

        let audio = &msg.media[0];
        assert_eq!(audio.name, "audio");
        assert_eq!(audio.port, 21730);
        assert_eq!(audio.codecs.len(), 2);
        assert_eq!(audio.codecs[0].name, "PCMU");
        assert_eq!(audio.codecs[0].clock_rate, 8000);
        assert_eq!(audio.candidates.len(), 2);
        assert_eq!(audio.candidates[0].username, "d3sA");
        assert_eq!(audio.candidates[0].password, "somepassword");
        assert_eq!(audio.attribute("rtcp"), Some("21731"));
    }

    #[test]
    fn test_parse_draft6_candidates() {
        let body = "\
o=- 0 0 IN IP4 10.0.0.1\r\n\
s=session\r\n\
c=IN IP4 10.0.0.1\r\n\
m=audio 5000 RTP/AVP 0\r\n\
a=candidate:CABBAGE 1 hqbnNCEZ UDP 900 10.0.0.1 5000\r\n\
a=rtpmap:0 PCMU/8000\r\n";

        let msg = parse(body).unwrap();
        assert_eq!(msg.ice_version, IceVersion::Draft6);
        let candidate = &msg.media[0].candidates[0];
        assert_eq!(candidate.username, "CABBAGE");
        assert_eq!(candidate.password, "hqbnNCEZ");
        assert_eq!(candidate.port, 5000);
    }

    #[test]
    fn test_parse_crypto_key() {
        let key = generate_srtp_key();
        let body = format!(
            "o=- 0 0 IN IP4 10.0.0.1\r\n\
             s=session\r\n\
             c=IN IP4 10.0.0.1\r\n\
             m=audio 5000 RTP/SAVP 0\r\n\
             a=crypto:3 AES_CM_128_HMAC_SHA1_80 inline:{}|2^31\r\n\
             a=rtpmap:0 PCMU/8000\r\n",
            base64::engine::general_purpose::STANDARD.encode(key)
        );

        let msg = parse(&body).unwrap();
        let audio = &msg.media[0];
        assert_eq!(audio.encryption_key.as_deref(), Some(&key[..]));
        assert_eq!(audio.encryption_key_id, 3);
        assert!(audio.encryption_active, "RTP/SAVP should mark encryption active");
    }

    #[test]
    fn test_parse_rejects_bodies_without_media() {
        assert!(parse("o=- 0 0 IN IP4 10.0.0.1\r\ns=session\r\n").is_err());
        assert!(parse("garbage").is_err());
    }

    #[test]
    fn test_codec_dedup_on_id() {
        let mut codecs = Vec::new();
        for (id, name) in [(8, "PCMA"), (0, "PCMU"), (8, "BOGUS")] {
            insert_codec_unique_sorted(
                &mut codecs,
                Codec {
                    id,
                    name: name.to_string(),
                    clock_rate: 8000,
                    media_type: MediaType::Audio,
                    parameters: Vec::new(),
                },
            );
        }
        assert_eq!(codecs.len(), 2);
        assert_eq!(codecs[0].id, 0);
        assert_eq!(codecs[1].id, 8);
        assert_eq!(codecs[1].name, "PCMA", "duplicate id must not replace the original");
    }

    #[test]
    fn test_sort_candidates_stable_order() {
        let mut candidates = vec![
            host_candidate("2", Component::Rtcp, "10.0.0.1", 5001),
            host_candidate("1", Component::Rtcp, "10.0.0.1", 5001),
            host_candidate("1", Component::Rtp, "10.0.0.1", 5000),
        ];
        sort_candidates(&mut candidates);
        assert_eq!(candidates[0].foundation, "1");
        assert_eq!(candidates[0].component, Component::Rtp);
        assert_eq!(candidates[1].component, Component::Rtcp);
        assert_eq!(candidates[2].foundation, "2");
    }

    #[test]
    fn test_select_endpoint_prefers_requested_type() {
        let mut relay = host_candidate("3", Component::Rtp, "192.0.2.20", 40000);
        relay.kind = CandidateType::Relay;
        let candidates = vec![
            relay,
            host_candidate("1", Component::Rtp, "10.0.0.1", 5000),
            host_candidate("1", Component::Rtcp, "10.0.0.1", 5001),
        ];

        let (ip, rtp, rtcp) = select_endpoint(&candidates, Some(CandidateType::Host));
        assert_eq!(ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(rtp, 5000);
        assert_eq!(rtcp, 5001);

        let (ip, rtp, _) = select_endpoint(&candidates, None);
        assert_eq!(ip.as_deref(), Some("192.0.2.20"));
        assert_eq!(rtp, 40000);
    }

    #[test]
    fn test_serialize_failed_section_keeps_port_zero() {
        let mut failed = SdpMedia::new("video");
        failed.port = 0;
        failed.ip = "10.0.0.2".to_string();
        let msg = SdpMessage {
            ip: "10.0.0.1".to_string(),
            ice_version: IceVersion::Rfc5245,
            media: vec![failed],
        };
        let body = msg.serialize();
        assert!(body.contains("m=video 0 RTP/AVP\r\n"));
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let mut audio = SdpMedia::new("audio");
        audio.port = 5000;
        audio.ip = "10.0.0.1".to_string();
        audio.codecs = vec![
            Codec {
                id: 0,
                name: "PCMU".to_string(),
                clock_rate: 8000,
                media_type: MediaType::Audio,
                parameters: Vec::new(),
            },
            Codec {
                id: 101,
                name: "telephone-event".to_string(),
                clock_rate: 8000,
                media_type: MediaType::Audio,
                parameters: vec![("0-16".to_string(), String::new())],
            },
        ];
        audio.candidates = vec![
            host_candidate("1", Component::Rtp, "10.0.0.1", 5000),
            host_candidate("1", Component::Rtcp, "10.0.0.1", 5001),
        ];
        // Host candidates serialise without raddr/rport.
        for candidate in &mut audio.candidates {
            candidate.base_ip.clear();
            candidate.base_port = 0;
        }
        audio.attributes = vec![
            ("rtcp".to_string(), "5001".to_string()),
            ("inactive".to_string(), String::new()),
        ];

        let msg = SdpMessage {
            ip: "10.0.0.1".to_string(),
            ice_version: IceVersion::Rfc5245,
            media: vec![audio],
        };

        let parsed = parse(&msg.serialize()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_serialize_skips_ipv6_candidates() {
        let mut audio = SdpMedia::new("audio");
        audio.port = 5000;
        audio.ip = "10.0.0.1".to_string();
        let mut v6 = host_candidate("9", Component::Rtp, "2001:db8::1", 5000);
        v6.base_ip.clear();
        audio.candidates = vec![v6, host_candidate("1", Component::Rtp, "10.0.0.1", 5000)];

        let body = SdpMessage {
            ip: "10.0.0.1".to_string(),
            ice_version: IceVersion::Rfc5245,
            media: vec![audio],
        }
        .serialize();
        assert!(!body.contains("2001:db8::1"), "IPv6 literal must never be emitted");
        assert!(body.contains("10.0.0.1 5000 typ host"));
    }
}
