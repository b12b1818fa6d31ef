//! Host capability traits — the boundary between the calling core and the
//! application that owns sockets, codecs, files and the SIP transport.
//!
//! The core is single-threaded and cooperative: it only ever runs inside a
//! host entry point and yields by calling back into one of these traits.
//! Implementations must deliver replies through the corresponding
//! `MediaSession` entry point on the same event loop, never synchronously
//! from within a trait call.

use serde::{Deserialize, Serialize};

use crate::calling::sdp::{Candidate, Codec};
use crate::calling::relay::ResolvedRelay;
use crate::sip::{Dialog, SipMessage};

/// Length of an SRTP master key carried in SDP, in bytes.
pub const SRTP_KEY_LEN: usize = 30;

/// ICE dialect negotiated for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceVersion {
    /// draft-ietf-mmusic-ice-06, used by OCS 2007 era servers.
    Draft6,
    /// RFC 5245, used by Lync 2010 and newer.
    Rfc5245,
}

impl IceVersion {
    /// The version number used in log messages and by the product UI
    /// ("ICEv6" / "ICEv19").
    pub fn number(self) -> u32 {
        match self {
            IceVersion::Draft6 => 6,
            IceVersion::Rfc5245 => 19,
        }
    }
}

/// Media type of a stream, as the backend understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    Application,
}

/// SRTP encryption policy for A/V calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionPolicy {
    /// Sentinel: resolve to the server-advertised default.
    ObeyServer,
    Rejected,
    Optional,
    Required,
}

/// Identifies a pending SIP client transaction back to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// The CSeq number the request was sent with.
    pub cseq: u32,
}

/// What the core wants done with the response to a request it sent.
///
/// The C original passed function pointers to the SIP layer; here the dialog
/// layer hands the value back to [`crate::calling::MediaSession::process_transaction_response`]
/// together with the parsed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Response to the initial INVITE of an outgoing call.
    InviteResponse { call_id: String },
    /// Response to a re-INVITE (hold/unhold); only needs an ACK.
    ReinviteAck { call_id: String },
    /// Response to the candidate-commit re-INVITE; ACK and accept media.
    FinalAck { call_id: String },
    /// Response to the MRAS credentials SERVICE request.
    RelayCredentials,
    /// Response to a file-transfer cancelTransfer INFO.
    FtCancel { call_id: String },
}

/// Outbound SIP operations. The transport owns retransmission, transaction
/// matching and the actual wire encoding; it bumps `dialog.cseq` for each
/// request sent within a dialog.
pub trait SipTransport {
    /// Send an INVITE within `dialog` and return the transaction CSeq.
    /// The response is delivered back with `continuation`.
    fn send_invite(
        &mut self,
        dialog: &mut Dialog,
        headers: &str,
        body: &str,
        continuation: Continuation,
    ) -> u32;

    /// Send a response to a previously received request.
    fn send_response(
        &mut self,
        request: &SipMessage,
        code: u16,
        reason: &str,
        extra_headers: &[(&str, &str)],
        body: Option<&str>,
    );

    /// Send an ACK on `dialog`. Like every in-dialog request this bumps
    /// `dialog.cseq` first; the core pre-winds the CSeq so the ACK matches
    /// the INVITE transaction it answers.
    fn send_ack(&mut self, dialog: &mut Dialog);

    /// Send an INFO within `dialog`. `continuation` is `None` when the core
    /// does not care about the response.
    fn send_info(
        &mut self,
        dialog: &mut Dialog,
        headers: &str,
        body: &str,
        continuation: Option<Continuation>,
    );

    /// Send a SERVICE request outside any dialog (MRAS).
    fn send_service(&mut self, uri: &str, headers: &str, body: &str, continuation: Continuation);
}

/// Parameters for creating one backend media stream.
pub struct StreamSetup<'a> {
    pub id: &'a str,
    pub with: &'a str,
    pub media_type: MediaType,
    pub ice_version: IceVersion,
    pub initiator: bool,
    pub relays: &'a [ResolvedRelay],
    pub relay_username: Option<&'a str>,
    pub relay_password: Option<&'a str>,
    pub min_port: u16,
    pub max_port: u16,
}

/// The media engine. Owns sockets, RTP/RTCP, SRTP contexts and codecs; the
/// core addresses calls and streams by the SIP Call-ID and the SDP section
/// name.
pub trait MediaBackend {
    /// Create the backend half of a call.
    fn media_new(&mut self, call_id: &str, with: &str, initiator: bool, hidden_from_ui: bool);

    /// Set the RTCP canonical name used for this call.
    fn set_cname(&mut self, call_id: &str, cname: &str);

    /// Create a stream and start gathering candidates. Returns false when
    /// the stream could not be created. Completion is reported through
    /// `MediaSession::stream_initialized`.
    fn add_stream(&mut self, call_id: &str, setup: &StreamSetup<'_>) -> bool;

    fn local_codecs(&self, call_id: &str, stream_id: &str) -> Vec<Codec>;
    fn local_candidates(&self, call_id: &str, stream_id: &str) -> Vec<Candidate>;

    /// Candidates of established pairs; empty until ICE concludes.
    fn active_local_candidates(&self, call_id: &str, stream_id: &str) -> Vec<Candidate>;
    fn active_remote_candidates(&self, call_id: &str, stream_id: &str) -> Vec<Candidate>;

    /// Returns false when no remote codec is usable.
    fn set_remote_codecs(&mut self, call_id: &str, stream_id: &str, codecs: &[Codec]) -> bool;
    fn add_remote_candidates(&mut self, call_id: &str, stream_id: &str, candidates: &[Candidate]);

    /// Install both SRTP master keys on the stream.
    fn set_encryption_keys(&mut self, call_id: &str, stream_id: &str, local: &[u8], remote: &[u8]);

    /// True once local candidate gathering for the stream finished.
    fn stream_initialized(&self, call_id: &str, stream_id: &str) -> bool;

    fn stream_is_held(&self, call_id: &str, stream_id: &str) -> bool;
    fn hold_stream(&mut self, call_id: &str, stream_id: &str, local: bool);
    fn unhold_stream(&mut self, call_id: &str, stream_id: &str, local: bool);

    /// Tear down one stream. The backend reports back through
    /// `MediaSession::stream_end`.
    fn end_stream(&mut self, call_id: &str, stream_id: &str);

    /// True once the local user accepted the call.
    fn media_accepted(&self, call_id: &str) -> bool;
    fn accept_media(&mut self, call_id: &str, local: bool);
    fn reject_media(&mut self, call_id: &str, local: bool);

    /// Hang up the call. `local` selects whether the backend should emit a
    /// BYE on the signalling path it owns.
    fn hangup_media(&mut self, call_id: &str, local: bool);

    /// Read from a data stream. With `blocking` the call must return exactly
    /// `buf.len()` bytes; otherwise it returns what is available.
    fn read_stream(&mut self, call_id: &str, stream_id: &str, buf: &mut [u8], blocking: bool)
        -> usize;
    fn write_stream(&mut self, call_id: &str, stream_id: &str, buf: &[u8], blocking: bool);

    /// The client's A/V encryption policy setting.
    fn encryption_policy(&self) -> EncryptionPolicy;

    /// The local network IP the backend would source media from.
    fn network_ip(&self) -> String;
}

/// Asynchronous A-record resolution, used for media relay hostnames.
pub trait DnsResolver {
    /// Start a query; the result arrives via `MediaSession::relay_resolved`
    /// keyed by the returned query id.
    fn query_a(&mut self, hostname: &str, port: u16) -> u64;

    fn cancel_query(&mut self, query_id: u64);
}

/// File I/O and user interaction for Lync file transfers. Keyed by Call-ID,
/// like the media backend.
pub trait FileTransferHost {
    /// Announce an incoming transfer offer. The host answers later through
    /// `MediaSession::accept_file_transfer` or `decline_file_transfer`.
    fn ft_incoming(&mut self, call_id: &str, with: &str, file_name: &str, size: u64);

    /// The transfer is about to move data.
    fn ft_start(&mut self, call_id: &str);

    /// Append received file bytes.
    fn ft_write(&mut self, call_id: &str, data: &[u8]);

    /// Read the next file bytes to send; returns the number read, 0 at EOF.
    fn ft_read(&mut self, call_id: &str, buf: &mut [u8]) -> usize;

    /// True once every byte of the outgoing file has been read.
    fn ft_completed(&self, call_id: &str) -> bool;

    /// The remote side cancelled the transfer.
    fn ft_cancelled_by_remote(&mut self, call_id: &str);

    /// Arrange for `MediaSession::pump_file_transfer` to be invoked from the
    /// event loop until it returns false.
    fn schedule_write_pump(&mut self, call_id: &str);
}

/// User-visible error reporting.
pub trait Notifier {
    fn notify_error(&mut self, title: &str, description: &str);
}

/// Everything the calling core needs from its host, bundled so entry points
/// take a single `&mut dyn MediaHost`.
pub trait MediaHost:
    SipTransport + MediaBackend + DnsResolver + FileTransferHost + Notifier
{
}

impl<T> MediaHost for T where
    T: SipTransport + MediaBackend + DnsResolver + FileTransferHost + Notifier
{
}
