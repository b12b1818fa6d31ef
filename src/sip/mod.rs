//! Parsed SIP message view and dialog record.
//!
//! Wire parsing and transaction management live in the host's SIP stack; the
//! core only inspects already-decoded messages and keeps the per-dialog state
//! it needs to build follow-up requests.

pub mod mime;

use uuid::Uuid;

/// Request or response discriminator of a [`SipMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipKind {
    Request { method: String },
    Response { code: u16, reason: String },
}

/// A decoded inbound SIP message as delivered by the host transport.
#[derive(Debug, Clone)]
pub struct SipMessage {
    pub kind: SipKind,
    /// Header name/value pairs in wire order. Names compare
    /// case-insensitively.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SipMessage {
    /// Build a request message (used by hosts and tests).
    pub fn request(method: &str, headers: Vec<(String, String)>, body: &str) -> Self {
        SipMessage {
            kind: SipKind::Request {
                method: method.to_string(),
            },
            headers,
            body: body.to_string(),
        }
    }

    /// Build a response message.
    pub fn response(code: u16, reason: &str, headers: Vec<(String, String)>, body: &str) -> Self {
        SipMessage {
            kind: SipKind::Response {
                code,
                reason: reason.to_string(),
            },
            headers,
            body: body.to_string(),
        }
    }

    /// First header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    pub fn response_code(&self) -> Option<u16> {
        match &self.kind {
            SipKind::Response { code, .. } => Some(*code),
            SipKind::Request { .. } => None,
        }
    }

    pub fn reason(&self) -> &str {
        match &self.kind {
            SipKind::Response { reason, .. } => reason,
            SipKind::Request { .. } => "",
        }
    }

    /// Numeric code of the `Warning` header, if present and well-formed.
    pub fn warning_code(&self) -> Option<u32> {
        let value = self.header("Warning")?;
        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    /// Human-readable reason from `ms-diagnostics` or `ms-client-diagnostics`
    /// (`reason="..."`).
    pub fn ms_diagnostics_reason(&self) -> Option<String> {
        let value = self
            .header("ms-diagnostics")
            .or_else(|| self.header("ms-client-diagnostics"))?;
        let start = value.find("reason=\"")? + "reason=\"".len();
        let end = value[start..].find('"')? + start;
        Some(value[start..end].to_string())
    }
}

/// Extract the bare URI from a `From`/`To` header value, dropping the display
/// name, angle brackets and parameters.
pub fn parse_uri(header_value: &str) -> String {
    let uri = match (header_value.find('<'), header_value.find('>')) {
        (Some(lt), Some(gt)) if lt < gt => &header_value[lt + 1..gt],
        _ => header_value,
    };
    uri.split(';').next().unwrap_or(uri).trim().to_string()
}

/// Tag parameter of a `From`/`To` header value.
pub fn parse_tag(header_value: &str) -> Option<String> {
    for param in header_value.split(';').skip(1) {
        let param = param.trim();
        if let Some(tag) = param.strip_prefix("tag=") {
            return Some(tag.to_string());
        }
    }
    None
}

/// Generate a new Call-ID.
pub fn gen_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a new dialog tag.
pub fn gen_tag() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Per-dialog state the core maintains for building in-dialog requests. The
/// transport bumps `cseq` whenever it sends a request on the dialog.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub call_id: String,
    /// Remote URI.
    pub with: String,
    pub our_tag: String,
    pub their_tag: Option<String>,
    pub cseq: u32,
}

impl Dialog {
    /// Fresh dialog for an outgoing call: new Call-ID, new local tag, CSeq 0.
    pub fn outgoing(with: &str) -> Self {
        Dialog {
            call_id: gen_call_id(),
            with: with.to_string(),
            our_tag: gen_tag(),
            their_tag: None,
            cseq: 0,
        }
    }

    /// Dialog created from an inbound INVITE; the remote tag comes from
    /// `From`, ours is freshly generated.
    pub fn from_invite(msg: &SipMessage) -> Self {
        let from = msg.header("From").unwrap_or("");
        Dialog {
            call_id: msg.call_id().unwrap_or("").to_string(),
            with: parse_uri(from),
            our_tag: gen_tag(),
            their_tag: parse_tag(from),
            cseq: 0,
        }
    }

    /// Record the remote tag from a response's `To` header.
    pub fn update_from_response(&mut self, msg: &SipMessage) {
        if self.their_tag.is_none() {
            if let Some(to) = msg.header("To") {
                self.their_tag = parse_tag(to);
            }
        }
    }
}
