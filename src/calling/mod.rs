//! Media call subsystem — call/stream records, the per-session registry and
//! the lifecycle entry points shared by all call kinds.
//!
//! `MediaSession` is the handle a signed-in account owns; every host entry
//! point takes it together with a `&mut dyn MediaHost`. All state transitions
//! run on the host event loop; nothing here is thread-safe and nothing needs
//! to be.

pub mod candidates;
pub mod conference;
pub mod filetransfer;
pub mod relay;
pub mod sdp;
pub mod signaling;

use std::collections::HashMap;

use crate::backend::{
    IceVersion, MediaHost, MediaType, StreamSetup, SRTP_KEY_LEN,
};
use crate::config::MediaConfig;
use crate::sip::{Dialog, SipMessage};

use filetransfer::FileTransfer;
use relay::RelayState;
use sdp::{SdpMedia, SdpMessage};

/// Call lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Outbound INVITE sent, awaiting the response.
    LocalOffering,
    /// Inbound INVITE received and 180 sent, awaiting local answer and
    /// stream readiness.
    RemoteOffering,
    Established,
    /// Re-INVITE in flight (hold/unhold or candidate commit).
    Reinviting,
    Terminating,
    Terminated,
}

/// Overlay payload attached to a stream by a higher layer. The call knows
/// only the tag; the overlay owns its state.
#[derive(Debug, Default)]
pub enum StreamOverlay {
    #[default]
    None,
    FileTransfer(FileTransfer),
}

/// One media direction-pair inside a call.
#[derive(Debug)]
pub struct MediaStream {
    /// SDP media section name: `audio`, `video`, `data`,
    /// `applicationsharing`.
    pub id: String,
    pub media_type: MediaType,
    pub(crate) encryption_key: Option<[u8; SRTP_KEY_LEN]>,
    pub(crate) encryption_key_id: u32,
    /// Set once the remote side's codecs and candidates were applied.
    pub(crate) remote_set: bool,
    /// Extra SDP attributes in insertion order; empty value for flags.
    pub(crate) extra_sdp: Vec<(String, String)>,
    pub overlay: StreamOverlay,
}

impl MediaStream {
    fn new(id: &str, media_type: MediaType) -> Self {
        MediaStream {
            id: id.to_string(),
            media_type,
            encryption_key: Some(sdp::generate_srtp_key()),
            encryption_key_id: 1,
            remote_set: false,
            extra_sdp: Vec::new(),
            overlay: StreamOverlay::None,
        }
    }

    /// Attach an extra SDP attribute emitted verbatim in this stream's media
    /// section.
    pub fn add_extra_attribute(&mut self, name: &str, value: &str) {
        self.extra_sdp.push((name.to_string(), value.to_string()));
    }

    pub fn remote_set(&self) -> bool {
        self.remote_set
    }

    pub(crate) fn file_transfer(&self) -> Option<&FileTransfer> {
        match &self.overlay {
            StreamOverlay::FileTransfer(ft) => Some(ft),
            StreamOverlay::None => None,
        }
    }

    pub(crate) fn file_transfer_mut(&mut self) -> Option<&mut FileTransfer> {
        match &mut self.overlay {
            StreamOverlay::FileTransfer(ft) => Some(ft),
            StreamOverlay::None => None,
        }
    }
}

/// Extra MIME part added to the next outgoing INVITE (proxy fallback, file
/// transfer publish). Consumed when the INVITE is built.
#[derive(Debug, Clone)]
pub(crate) struct ExtraInviteSection {
    /// Top-level multipart content type (`multipart/mixed` or
    /// `multipart/alternative`).
    pub content_type: String,
    /// The part, including its own MIME headers.
    pub body: String,
}

/// A media session with one remote party.
#[derive(Debug)]
pub struct MediaCall {
    /// SIP Call-ID; registry key.
    pub id: String,
    /// Remote URI (a sip: URI, possibly an `app:conf:audio-video:` focus).
    pub with: String,
    pub dialog: Dialog,
    pub ice_version: IceVersion,
    pub initiator: bool,
    /// Data sessions (file transfer) are not shown as calls in the UI.
    pub hidden_from_ui: bool,
    pub state: CallState,
    pub(crate) encryption_compatible: bool,
    /// The inbound INVITE we still owe a final response.
    pub(crate) invitation: Option<SipMessage>,
    /// Remote SDP waiting for local streams to finish initialising.
    pub(crate) pending_remote: Option<SdpMessage>,
    pub(crate) extra_invite_section: Option<ExtraInviteSection>,
    pub(crate) streams: Vec<MediaStream>,
    /// Sections we refused; echoed back with port 0 in the next answer.
    pub(crate) failed_media: Vec<SdpMedia>,
}

impl MediaCall {
    fn new(id: &str, with: &str, dialog: Dialog, ice_version: IceVersion, initiator: bool,
           hidden_from_ui: bool) -> Self {
        MediaCall {
            id: id.to_string(),
            with: with.to_string(),
            dialog,
            ice_version,
            initiator,
            hidden_from_ui,
            state: CallState::Idle,
            encryption_compatible: true,
            invitation: None,
            pending_remote: None,
            extra_invite_section: None,
            streams: Vec::new(),
            failed_media: Vec::new(),
        }
    }

    pub fn stream(&self, id: &str) -> Option<&MediaStream> {
        self.streams.iter().find(|s| s.id == id)
    }

    pub fn stream_mut(&mut self, id: &str) -> Option<&mut MediaStream> {
        self.streams.iter_mut().find(|s| s.id == id)
    }

    pub fn streams(&self) -> &[MediaStream] {
        &self.streams
    }

    /// True when this call targets a conference A/V focus.
    pub fn is_conference_call(&self) -> bool {
        self.with.contains("app:conf:audio-video:")
    }

    /// Replace the extra MIME part of the next outgoing INVITE.
    pub fn set_extra_invite_section(&mut self, content_type: &str, body: String) {
        self.extra_invite_section = Some(ExtraInviteSection {
            content_type: content_type.to_string(),
            body,
        });
    }
}

/// Process-wide calling state of one signed-in account: the Call-ID
/// registry, MRAS credentials and the resolved relay list.
pub struct MediaSession {
    config: MediaConfig,
    pub(crate) calls: HashMap<String, MediaCall>,
    pub(crate) relay: RelayState,
    /// Monotonic id for outgoing ms-filetransfer requests.
    pub(crate) ft_request_id_seq: u32,
}

impl MediaSession {
    pub fn new(config: MediaConfig) -> Self {
        MediaSession {
            config,
            calls: HashMap::new(),
            relay: RelayState::default(),
            ft_request_id_seq: 0,
        }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MediaConfig {
        &mut self.config
    }

    pub fn call(&self, call_id: &str) -> Option<&MediaCall> {
        self.calls.get(call_id)
    }

    pub(crate) fn call_mut(&mut self, call_id: &str) -> Option<&mut MediaCall> {
        self.calls.get_mut(call_id)
    }

    /// Call record matching an inbound message's Call-ID.
    pub fn call_for_message(&self, msg: &SipMessage) -> Option<&MediaCall> {
        self.calls.get(msg.call_id()?)
    }

    /// Call-ID of the active voice call, if any (a call with an `audio`
    /// stream).
    pub fn voice_call_id(&self) -> Option<&str> {
        self.calls
            .values()
            .find(|call| call.stream("audio").is_some())
            .map(|call| call.id.as_str())
    }

    /// Create and register an outgoing call with a fresh dialog.
    pub(crate) fn new_outgoing_call(
        &mut self,
        host: &mut dyn MediaHost,
        with: &str,
        ice_version: IceVersion,
        hidden_from_ui: bool,
    ) -> String {
        let dialog = Dialog::outgoing(with);
        let call_id = dialog.call_id.clone();
        self.register_call(host, &call_id, with, dialog, ice_version, true, hidden_from_ui);
        call_id
    }

    /// Create and register a call for an inbound INVITE.
    pub(crate) fn new_incoming_call(
        &mut self,
        host: &mut dyn MediaHost,
        msg: &SipMessage,
        ice_version: IceVersion,
        hidden_from_ui: bool,
    ) -> String {
        let dialog = Dialog::from_invite(msg);
        let call_id = dialog.call_id.clone();
        let with = dialog.with.clone();
        self.register_call(host, &call_id, &with, dialog, ice_version, false, hidden_from_ui);
        call_id
    }

    fn register_call(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        with: &str,
        dialog: Dialog,
        ice_version: IceVersion,
        initiator: bool,
        hidden_from_ui: bool,
    ) {
        debug_assert!(
            !self.calls.contains_key(call_id),
            "duplicate Call-ID in registry"
        );
        tracing::info!(
            "Creating {} call {} with {} (ICEv{})",
            if initiator { "outgoing" } else { "incoming" },
            call_id,
            with,
            ice_version.number()
        );

        host.media_new(call_id, with, initiator, hidden_from_ui);
        host.set_cname(call_id, &self.config.cname());

        self.calls.insert(
            call_id.to_string(),
            MediaCall::new(call_id, with, dialog, ice_version, initiator, hidden_from_ui),
        );
    }

    /// Add a local stream to a call and start gathering its candidates.
    /// Returns false when the backend could not create the stream.
    pub(crate) fn add_stream(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        stream_id: &str,
        media_type: MediaType,
        ice_version: IceVersion,
        initiator: bool,
    ) -> bool {
        let ports = &self.config.ports;
        let range = match media_type {
            MediaType::Audio => ports.audio,
            MediaType::Video => ports.video,
            MediaType::Application => match stream_id {
                "data" => ports.filetransfer,
                "applicationsharing" => ports.appsharing,
                _ => None,
            },
        }
        .unwrap_or(ports.media);

        let relays = self.relay.snapshot();
        let Some(call) = self.calls.get_mut(call_id) else {
            return false;
        };

        let setup = StreamSetup {
            id: stream_id,
            with: &call.with,
            media_type,
            ice_version,
            initiator,
            relays: &relays,
            relay_username: self.relay.username.as_deref(),
            relay_password: self.relay.password.as_deref(),
            min_port: range.min,
            max_port: range.max,
        };

        if !host.add_stream(call_id, &setup) {
            tracing::warn!("Backend refused {} stream for call {}", stream_id, call_id);
            return false;
        }

        call.streams.push(MediaStream::new(stream_id, media_type));
        true
    }

    /// Backend reports a stream has ended; drop our record of it.
    pub fn stream_end(&mut self, call_id: &str, stream_id: &str) {
        if let Some(call) = self.calls.get_mut(call_id) {
            call.streams.retain(|s| s.id != stream_id);
            tracing::debug!("Stream {} of call {} ended", stream_id, call_id);
        }
    }

    /// Backend reports the whole call's media is gone; forget the call.
    pub fn media_end(&mut self, call_id: &str) {
        if let Some(mut call) = self.calls.remove(call_id) {
            call.state = CallState::Terminated;
            tracing::info!("Call {} with {} ended", call_id, call.with);
        }
    }

    /// Remove a call record without waiting for backend callbacks. Used on
    /// fatal signalling errors and ICE-version retries.
    pub(crate) fn drop_call(&mut self, call_id: &str) {
        self.calls.remove(call_id);
    }
}

#[cfg(test)]
pub(crate) mod mock;
