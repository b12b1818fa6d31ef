//! MRAS client — A/V Edge credential acquisition and the media relay list.
//!
//! On demand the core POSTs an XML request to the MRAS URI via a SIP SERVICE
//! and keeps the returned credentials plus relay list for the lifetime of the
//! session. Relay hostnames are resolved through the host's async DNS; a
//! relay whose name never resolves is skipped downstream. If anything here
//! fails the calls simply run without relays.

use std::io::Cursor;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::backend::{Continuation, MediaHost};
use crate::calling::sdp::rand_u32;
use crate::calling::MediaSession;
use crate::sip::SipMessage;

/// Credential lifetime we ask the server for, in seconds.
pub const RELAY_CREDENTIALS_DURATION_SECS: u32 = 480;

const MRAS_NS: &str = "http://schemas.microsoft.com/2006/09/sip/mrasp";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// One media relay. `hostname` is replaced by the resolved IP once DNS
/// completes and cleared when resolution fails.
#[derive(Debug, Clone)]
pub struct MediaRelay {
    pub hostname: Option<String>,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub(crate) dns_query: Option<u64>,
}

/// A relay entry ready to hand to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelay {
    pub ip: String,
    pub udp_port: u16,
    pub tcp_port: u16,
}

/// MRAS credentials and relay list for the signed-in session.
#[derive(Debug, Default)]
pub struct RelayState {
    pub username: Option<String>,
    pub password: Option<String>,
    pub relays: Vec<MediaRelay>,
}

impl RelayState {
    /// Relays usable right now (resolution finished and succeeded, or the
    /// entry never needed resolving).
    pub fn snapshot(&self) -> Vec<ResolvedRelay> {
        self.relays
            .iter()
            .filter_map(|relay| {
                relay.hostname.as_ref().map(|host| ResolvedRelay {
                    ip: host.clone(),
                    udp_port: relay.udp_port,
                    tcp_port: relay.tcp_port,
                })
            })
            .collect()
    }

    /// True once less than 10 % of the advertised credential lifetime
    /// remains; the host re-requests credentials on its own clock.
    pub fn needs_refresh(&self, elapsed_secs: u32) -> bool {
        self.username.is_some()
            && elapsed_secs >= RELAY_CREDENTIALS_DURATION_SECS * 9 / 10
    }

    fn clear(&mut self, host: &mut dyn MediaHost) {
        self.username = None;
        self.password = None;
        for relay in self.relays.drain(..) {
            if let Some(query) = relay.dns_query {
                host.cancel_query(query);
            }
        }
    }
}

impl MediaSession {
    /// Ask the MRAS service for relay credentials. No-op when the server did
    /// not provision an MRAS URI.
    pub fn request_relay_credentials(&mut self, host: &mut dyn MediaHost) {
        let Some(mras_uri) = self.config().mras_uri.clone() else {
            return;
        };
        let location = if self.config().remote_user {
            "internet"
        } else {
            "intranet"
        };
        let body = match build_credentials_request(&self.config().self_uri, &mras_uri, location) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to build MRAS request: {}", e);
                return;
            }
        };

        tracing::info!("Requesting A/V Edge credentials from {}", mras_uri);
        host.send_service(
            &mras_uri,
            "Content-Type: application/msrtc-media-relay-auth+xml\r\n",
            &body,
            Continuation::RelayCredentials,
        );
    }

    /// Response to the MRAS SERVICE request.
    pub(crate) fn process_relay_credentials_response(
        &mut self,
        host: &mut dyn MediaHost,
        msg: &SipMessage,
    ) {
        let mut relay = std::mem::take(&mut self.relay);
        relay.clear(host);

        let code = msg.response_code().unwrap_or(0);
        if code != 200 {
            tracing::info!(
                "MRAS response is {}; failed to obtain A/V Edge credentials",
                code
            );
            self.relay = relay;
            return;
        }

        match parse_credentials_response(&msg.body) {
            Some(parsed) => {
                relay.username = Some(parsed.username);
                relay.password = Some(parsed.password);
                for (hostname, udp_port, tcp_port) in parsed.relays {
                    tracing::info!(
                        "Media relay: {} TCP: {} UDP: {}",
                        hostname,
                        tcp_port,
                        udp_port
                    );
                    let dns_query = host.query_a(&hostname, udp_port);
                    relay.relays.push(MediaRelay {
                        hostname: Some(hostname),
                        udp_port,
                        tcp_port,
                        dns_query: Some(dns_query),
                    });
                }
            }
            None => tracing::info!("MRAS response not understood; running without relays"),
        }

        self.relay = relay;
    }

    /// DNS resolution finished for one relay hostname.
    pub fn relay_resolved(&mut self, query_id: u64, ip: Option<&str>) {
        let Some(relay) = self
            .relay
            .relays
            .iter_mut()
            .find(|r| r.dns_query == Some(query_id))
        else {
            return;
        };
        relay.dns_query = None;

        let hostname = relay.hostname.take();
        match ip {
            Some(ip) => {
                tracing::info!(
                    "Media relay {} resolved to {}",
                    hostname.as_deref().unwrap_or("?"),
                    ip
                );
                relay.hostname = Some(ip.to_string());
            }
            None => {
                tracing::info!(
                    "Unable to resolve media relay {}",
                    hostname.as_deref().unwrap_or("?")
                );
            }
        }
    }
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesStart::new(name).to_end()))?;
    Ok(())
}

/// Build the MRAS credentials request body.
fn build_credentials_request(
    self_uri: &str,
    mras_uri: &str,
    location: &str,
) -> quick_xml::Result<String> {
    let request_id = rand_u32().to_string();
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut request = BytesStart::new("request");
    request.push_attribute(("requestID", request_id.as_str()));
    request.push_attribute(("from", self_uri));
    request.push_attribute(("version", "1.0"));
    request.push_attribute(("to", mras_uri));
    request.push_attribute(("xmlns", MRAS_NS));
    request.push_attribute(("xmlns:xsi", XSI_NS));
    writer.write_event(Event::Start(request))?;

    let mut creds = BytesStart::new("credentialsRequest");
    creds.push_attribute(("credentialsRequestID", request_id.as_str()));
    writer.write_event(Event::Start(creds))?;

    write_text_element(&mut writer, "identity", self_uri)?;
    write_text_element(&mut writer, "location", location)?;
    write_text_element(
        &mut writer,
        "duration",
        &RELAY_CREDENTIALS_DURATION_SECS.to_string(),
    )?;

    writer.write_event(Event::End(BytesStart::new("credentialsRequest").to_end()))?;
    writer.write_event(Event::End(BytesStart::new("request").to_end()))?;

    Ok(String::from_utf8(writer.into_inner().into_inner()).expect("writer produced valid UTF-8"))
}

pub(crate) struct ParsedCredentials {
    pub username: String,
    pub password: String,
    /// (hostname, udp port, tcp port)
    pub relays: Vec<(String, u16, u16)>,
}

/// Parse the MRAS response body. Returns `None` unless the response carries
/// `reasonPhrase="OK"` and a credentials block.
pub(crate) fn parse_credentials_response(body: &str) -> Option<ParsedCredentials> {
    let mut reader = Reader::from_str(body);
    let mut path: Vec<String> = Vec::new();
    let mut ok = false;
    let mut username = None;
    let mut password = None;
    let mut relays = Vec::new();
    let mut current_relay: Option<(String, u16, u16)> = None;

    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if path.is_empty() {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"reasonPhrase" {
                            ok = attr.unescape_value().ok()?.as_ref() == "OK";
                        }
                    }
                }
                if name == "mediaRelay" {
                    current_relay = Some((String::new(), 0, 0));
                }
                path.push(name);
            }
            Event::Text(e) => {
                let text = e.unescape().ok()?.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                let in_credentials = path.iter().any(|n| n == "credentials");
                match (path.last().map(String::as_str), &mut current_relay) {
                    (Some("username"), _) if in_credentials => username = Some(text),
                    (Some("password"), _) if in_credentials => password = Some(text),
                    (Some("hostName"), Some(relay)) => relay.0 = text,
                    (Some("udpPort"), Some(relay)) => relay.1 = text.parse().unwrap_or(0),
                    (Some("tcpPort"), Some(relay)) => relay.2 = text.parse().unwrap_or(0),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"mediaRelay" {
                    if let Some(relay) = current_relay.take() {
                        if !relay.0.is_empty() {
                            relays.push(relay);
                        }
                    }
                }
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !ok {
        return None;
    }
    Some(ParsedCredentials {
        username: username?,
        password: password?,
        relays,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_carries_identity_and_location() {
        let body = build_credentials_request(
            "sip:jane@example.com",
            "sip:mrassrv@example.com;gruu;opaque=srvr:MRAS:xyz",
            "intranet",
        )
        .unwrap();

        assert!(body.starts_with("<request "));
        assert!(body.contains("from=\"sip:jane@example.com\""));
        assert!(body.contains("<identity>sip:jane@example.com</identity>"));
        assert!(body.contains("<location>intranet</location>"));
        assert!(body.contains("<duration>480</duration>"));
        assert!(body.contains(MRAS_NS));
    }

    #[test]
    fn test_parse_credentials_response() {
        let body = r#"<?xml version="1.0"?>
<response xmlns="http://schemas.microsoft.com/2006/09/sip/mrasp" requestID="1" reasonPhrase="OK">
  <credentialsResponse credentialsRequestID="1">
    <credentials>
      <username>dXNlcg==</username>
      <password>cGFzcw==</password>
      <duration>480</duration>
    </credentials>
    <mediaRelayList>
      <mediaRelay>
        <location>intranet</location>
        <hostName>edge1.example.com</hostName>
        <udpPort>3478</udpPort>
        <tcpPort>443</tcpPort>
      </mediaRelay>
      <mediaRelay>
        <hostName>edge2.example.com</hostName>
        <udpPort>3478</udpPort>
      </mediaRelay>
    </mediaRelayList>
  </credentialsResponse>
</response>"#;

        let parsed = parse_credentials_response(body).unwrap();
        assert_eq!(parsed.username, "dXNlcg==");
        assert_eq!(parsed.password, "cGFzcw==");
        assert_eq!(parsed.relays.len(), 2);
        assert_eq!(
            parsed.relays[0],
            ("edge1.example.com".to_string(), 3478, 443)
        );
        assert_eq!(parsed.relays[1], ("edge2.example.com".to_string(), 3478, 0));
    }

    #[test]
    fn test_parse_rejects_non_ok_response() {
        let body = r#"<response reasonPhrase="Denied"><credentialsResponse/></response>"#;
        assert!(parse_credentials_response(body).is_none());
    }

    #[test]
    fn test_snapshot_skips_unresolved_relays() {
        let state = RelayState {
            username: Some("u".into()),
            password: Some("p".into()),
            relays: vec![
                MediaRelay {
                    hostname: Some("192.0.2.10".into()),
                    udp_port: 3478,
                    tcp_port: 443,
                    dns_query: None,
                },
                MediaRelay {
                    hostname: None,
                    udp_port: 3478,
                    tcp_port: 443,
                    dns_query: None,
                },
            ],
        };
        let snapshot = state.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].ip, "192.0.2.10");
    }

    #[test]
    fn test_needs_refresh_near_expiry() {
        let state = RelayState {
            username: Some("u".into()),
            ..RelayState::default()
        };
        assert!(!state.needs_refresh(100));
        assert!(!state.needs_refresh(431));
        assert!(state.needs_refresh(432));

        assert!(!RelayState::default().needs_refresh(480));
    }

    #[test]
    fn test_credentials_flow_end_to_end() {
        use crate::backend::{Continuation, Transaction};
        use crate::calling::mock::MockHost;

        let mras = "sip:mrassrv@example.com;gruu;opaque=srvr:MRAS:xyz";
        let mut config = crate::config::MediaConfig::default();
        config.self_uri = "sip:jane@example.com".into();
        config.contact = "<sip:jane@example.com>".into();
        config.mras_uri = Some(mras.into());
        let mut session = MediaSession::new(config);
        let mut host = MockHost::new();

        session.request_relay_credentials(&mut host);
        assert_eq!(host.services.len(), 1);
        assert_eq!(host.services[0].0, mras);
        assert!(host.services[0].1.contains("<identity>sip:jane@example.com</identity>"));
        assert!(host.services[0].1.contains("<location>intranet</location>"));

        let body = r#"<response xmlns="http://schemas.microsoft.com/2006/09/sip/mrasp" reasonPhrase="OK">
  <credentialsResponse>
    <credentials><username>dXNlcg==</username><password>cGFzcw==</password></credentials>
    <mediaRelayList>
      <mediaRelay><hostName>edge1.example.com</hostName><udpPort>3478</udpPort><tcpPort>443</tcpPort></mediaRelay>
      <mediaRelay><hostName>edge2.example.com</hostName><udpPort>3478</udpPort></mediaRelay>
    </mediaRelayList>
  </credentialsResponse>
</response>"#;
        let msg = SipMessage::response(200, "OK", Vec::new(), body);
        session.process_transaction_response(
            &mut host,
            Continuation::RelayCredentials,
            Transaction { cseq: 1 },
            &msg,
        );

        assert_eq!(session.relay.username.as_deref(), Some("dXNlcg=="));
        assert_eq!(session.relay.relays.len(), 2);
        assert_eq!(host.dns_queries.len(), 2);
        assert_eq!(host.dns_queries[0].1, "edge1.example.com");

        session.relay_resolved(host.dns_queries[0].0, Some("192.0.2.10"));
        session.relay_resolved(host.dns_queries[1].0, None);

        let snapshot = session.relay.snapshot();
        assert_eq!(
            snapshot,
            vec![ResolvedRelay {
                ip: "192.0.2.10".into(),
                udp_port: 3478,
                tcp_port: 443,
            }]
        );
    }
}
