//! Media calling core for the extended SIP/SIMPLE dialect spoken by Office
//! Communicator / Lync servers.
//!
//! The crate owns the signalling state machine for peer-to-peer and
//! conference audio/video calls plus Lync file transfers: SIP
//! INVITE/ACK/CANCEL/BYE flows with SDP bodies, ICE candidate exchange in
//! both deployed dialects, SRTP key negotiation and the ms-filetransfer
//! control protocol. Everything with a socket, a codec or a file handle
//! lives behind the host traits in [`backend`]; the host event loop drives
//! the core through the entry points on [`calling::MediaSession`], one
//! callback at a time.

pub mod backend;
pub mod calling;
pub mod config;
pub mod sip;

pub use backend::{
    Continuation, DnsResolver, EncryptionPolicy, FileTransferHost, IceVersion, MediaBackend,
    MediaHost, MediaType, Notifier, SipTransport, StreamSetup, Transaction, SRTP_KEY_LEN,
};
pub use calling::{CallState, MediaCall, MediaSession, MediaStream, StreamOverlay};
pub use config::{MediaConfig, PortConfig, PortRange};
pub use sip::{Dialog, SipKind, SipMessage};
