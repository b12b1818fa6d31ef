//! Call signalling — the INVITE/response/ACK state machine, SDP answer
//! construction, the failure-response map and ICE-version recovery.
//!
//! Entry points here are invoked by the host for inbound SIP traffic,
//! transaction responses and backend events. Processing of an outgoing call
//! pauses after each wire operation and resumes in the next callback; the
//! comments mark where.

use crate::backend::{
    Continuation, EncryptionPolicy, IceVersion, MediaHost, MediaType, Transaction,
};
use crate::calling::candidates::{
    drop_ipv6_and_sort, remove_mistagged_tcp_candidates, repair_tcp_ports,
};
use crate::calling::sdp::{
    self, insert_codec_unique_sorted, media_type_for_section, select_endpoint, CandidateType,
    SdpMedia, SdpMessage,
};
use crate::calling::{CallState, MediaCall, MediaSession, MediaStream};
use crate::sip::SipMessage;

/// MIME boundary used for every multipart INVITE body we produce.
pub const MULTIPART_BOUNDARY: &str = "----=_NextPart_000_001E_01CB4397.0B5EB570";

/// The resolved encryption policy: the client setting, with the
/// "obey server" sentinel replaced by the server default.
fn effective_encryption_policy(
    host: &dyn MediaHost,
    server_default: EncryptionPolicy,
) -> EncryptionPolicy {
    match host.encryption_policy() {
        EncryptionPolicy::ObeyServer => server_default,
        policy => policy,
    }
}

fn call_initialized(host: &dyn MediaHost, call: &MediaCall) -> bool {
    call.streams
        .iter()
        .all(|stream| host.stream_initialized(&call.id, &stream.id))
}

/// Convert one local stream into its SDP media section from current backend
/// state.
fn stream_to_sdp_media(
    host: &mut dyn MediaHost,
    call: &MediaCall,
    stream: &MediaStream,
    effective_policy: EncryptionPolicy,
    server_default: EncryptionPolicy,
) -> Option<SdpMedia> {
    media_type_for_section(&stream.id)?;

    let mut media = SdpMedia::new(&stream.id);

    for codec in host.local_codecs(&call.id, &stream.id) {
        insert_codec_unique_sorted(&mut media.codecs, codec);
    }

    // Once candidate pairs are established only those go out; before that,
    // every gathered local candidate does.
    let mut candidates = host.active_local_candidates(&call.id, &stream.id);
    if candidates.is_empty() {
        candidates = remove_mistagged_tcp_candidates(host.local_candidates(&call.id, &stream.id));
    }
    let mut candidates = drop_ipv6_and_sort(candidates);
    repair_tcp_ports(&mut candidates);
    media.candidates = candidates;

    let (ip, rtp_port, rtcp_port) = {
        let host_pick = select_endpoint(&media.candidates, Some(CandidateType::Host));
        if host_pick.0.is_none() && !media.candidates.is_empty() {
            select_endpoint(&media.candidates, None)
        } else {
            host_pick
        }
    };
    media.ip = ip.unwrap_or_default();
    media.port = rtp_port;

    if host.stream_is_held(&call.id, &stream.id) {
        media.attributes.push(("inactive".to_string(), String::new()));
    }
    if rtcp_port != 0 {
        media
            .attributes
            .push(("rtcp".to_string(), rtcp_port.to_string()));
    }

    // Only an explicit deviation from the server default goes on the wire;
    // calls under the default look like pre-policy clients.
    if effective_policy != server_default {
        let token = match effective_policy {
            EncryptionPolicy::Rejected => "rejected",
            EncryptionPolicy::Optional => "optional",
            _ => "required",
        };
        media
            .attributes
            .push(("encryption".to_string(), token.to_string()));
    }

    media.remote_candidates =
        drop_ipv6_and_sort(host.active_remote_candidates(&call.id, &stream.id));

    media.encryption_active = stream.encryption_key.is_some()
        && call.encryption_compatible
        && stream.remote_set
        && effective_policy != EncryptionPolicy::Rejected;

    if let Some(key) = &stream.encryption_key {
        if effective_policy != EncryptionPolicy::Rejected {
            media.encryption_key = Some(key.to_vec());
            media.encryption_key_id = stream.encryption_key_id;
        }
    }

    for (name, value) in &stream.extra_sdp {
        media.attributes.push((name.clone(), value.clone()));
    }

    Some(media)
}

impl MediaSession {
    /// Place an audio (and optionally video) call. Refused while another
    /// voice call exists; no SIP traffic is generated then. Returns the new
    /// Call-ID.
    pub fn initiate_call(
        &mut self,
        host: &mut dyn MediaHost,
        with: &str,
        with_video: bool,
    ) -> Option<String> {
        self.initiate_call_with_ice(host, with, IceVersion::Rfc5245, with_video)
    }

    pub(crate) fn initiate_call_with_ice(
        &mut self,
        host: &mut dyn MediaHost,
        with: &str,
        ice_version: IceVersion,
        with_video: bool,
    ) -> Option<String> {
        if self.voice_call_id().is_some() {
            tracing::info!("Refusing call to {}: another voice call is active", with);
            return None;
        }

        let call_id = self.new_outgoing_call(host, with, ice_version, false);

        if !self.add_stream(
            host,
            &call_id,
            "audio",
            MediaType::Audio,
            ice_version,
            true,
        ) {
            host.notify_error("Error occurred", "Error creating audio stream");
            host.hangup_media(&call_id, false);
            self.drop_call(&call_id);
            return None;
        }

        if with_video
            && !self.add_stream(
                host,
                &call_id,
                "video",
                MediaType::Video,
                ice_version,
                true,
            )
        {
            host.notify_error("Error occurred", "Error creating video stream");
            host.hangup_media(&call_id, false);
            self.drop_call(&call_id);
            return None;
        }

        self.append_proxy_fallback_if_needed(host, &call_id);

        // Processing continues in stream_initialized.
        Some(call_id)
    }

    /// Dial a phone number through the enterprise voice gateway.
    pub fn place_phone_call(
        &mut self,
        host: &mut dyn MediaHost,
        phone_number: &str,
    ) -> Option<String> {
        if !phone_number_is_valid(phone_number) {
            host.notify_error("Unable to establish a call", "Invalid phone number");
            return None;
        }
        let uri = format!(
            "sip:{}@{};user=phone",
            phone_number,
            self.config().sip_domain
        );
        self.initiate_call(host, &uri, false)
    }

    /// Call the server's audio test bot.
    pub fn place_test_call(&mut self, host: &mut dyn MediaHost) -> Option<String> {
        let Some(bot_uri) = self.config().test_call_bot_uri.clone() else {
            host.notify_error(
                "Unable to establish a call",
                "Audio Test Service is not available.",
            );
            return None;
        };
        self.initiate_call(host, &bot_uri, false)
    }

    /// First-time RFC 5245 calls get a multipart/alternative body with an
    /// empty `m=audio` alternative so 2007-era proxies can still parse
    /// something. Test-bot calls are exempt.
    fn append_proxy_fallback_if_needed(&mut self, host: &mut dyn MediaHost, call_id: &str) {
        let test_bot = self.config().test_call_bot_uri.clone();
        let Some(call) = self.call_mut(call_id) else {
            return;
        };
        if call.dialog.cseq != 0
            || call.ice_version != IceVersion::Rfc5245
            || test_bot.as_deref() == Some(call.with.as_str())
        {
            return;
        }

        let ip = host.network_ip();
        let body = format!(
            "Content-Type: application/sdp\r\n\
             Content-Transfer-Encoding: 7bit\r\n\
             Content-Disposition: session; handling=optional; ms-proxy-2007fallback\r\n\
             \r\n\
             o=- 0 0 IN IP4 {ip}\r\n\
             s=session\r\n\
             c=IN IP4 {ip}\r\n\
             m=audio 0 RTP/AVP\r\n"
        );
        call.set_extra_invite_section("multipart/alternative", body);
    }

    /// Serialise the call's current state into an SDP message. Failed remote
    /// sections are drained into the result so the peer sees them declined
    /// with port 0.
    pub(crate) fn build_sdp_message(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
    ) -> Option<SdpMessage> {
        let server_default = self.config().server_av_encryption_policy;
        let effective = effective_encryption_policy(host, server_default);

        let call = self.calls.get_mut(call_id)?;
        let mut msg = SdpMessage {
            ip: String::new(),
            ice_version: call.ice_version,
            media: Vec::new(),
        };

        for i in 0..call.streams.len() {
            if let Some(media) =
                stream_to_sdp_media(host, call, &call.streams[i], effective, server_default)
            {
                if msg.ip.is_empty() {
                    msg.ip = media.ip.clone();
                }
                msg.media.push(media);
            }
        }

        msg.media.append(&mut call.failed_media);

        Some(msg)
    }

    /// Build and send an INVITE (or re-INVITE) for the call.
    pub(crate) fn send_call_invite(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        continuation: Continuation,
    ) {
        let contact = self.config().contact.clone();
        let identity = self.config().uc_line_uri.clone().map(|line| {
            format!(
                "P-Preferred-Identity: <{}>, <{}>\r\n",
                self.config().self_uri,
                line
            )
        });

        let Some(sdp) = self.build_sdp_message(host, call_id) else {
            return;
        };
        let sdp_body = sdp.serialize();

        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };

        let (content_type, body) = match call.extra_invite_section.take() {
            Some(extra) => (
                format!("{};boundary=\"{}\"", extra.content_type, MULTIPART_BOUNDARY),
                format!(
                    "--{b}\r\n\
                     {extra}\r\n\
                     --{b}\r\n\
                     Content-Type: application/sdp\r\n\
                     Content-Transfer-Encoding: 7bit\r\n\
                     Content-Disposition: session; handling=optional\r\n\
                     \r\n\
                     {sdp}\r\n\
                     --{b}--\r\n",
                    b = MULTIPART_BOUNDARY,
                    extra = extra.body,
                    sdp = sdp_body
                ),
            ),
            None => ("application/sdp".to_string(), sdp_body),
        };

        let headers = format!(
            "ms-keep-alive: UAC;hop-hop=yes\r\n\
             Contact: {}\r\n\
             {}Content-Type: {}\r\n",
            contact,
            identity.as_deref().unwrap_or(""),
            content_type
        );

        call.state = match continuation {
            Continuation::InviteResponse { .. } => CallState::LocalOffering,
            _ => CallState::Reinviting,
        };
        tracing::info!("Sending INVITE for call {} (cseq {})", call_id, call.dialog.cseq + 1);
        host.send_invite(&mut call.dialog, &headers, &body, continuation);
    }

    /// Inbound INVITE dispatcher: file-transfer INVITEs carry a
    /// `ms-filetransfer+xml` part, everything else is a media call.
    pub fn process_incoming_invite(&mut self, host: &mut dyn MediaHost, msg: &SipMessage) {
        let content_type = msg.header("Content-Type").unwrap_or("");
        if content_type.starts_with("multipart/mixed")
            && msg.body.contains("application/ms-filetransfer+xml")
        {
            self.process_incoming_invite_file_transfer(host, msg);
        } else {
            self.process_incoming_invite_call(host, msg);
        }
    }

    /// Inbound INVITE (or re-INVITE) with an SDP body.
    pub(crate) fn process_incoming_invite_call(
        &mut self,
        host: &mut dyn MediaHost,
        msg: &SipMessage,
    ) -> Option<String> {
        let call_id = msg.call_id()?.to_string();
        let is_data_session =
            msg.body.contains("m=data") || msg.body.contains("m=applicationsharing");

        // Don't allow two voice calls in parallel.
        if !is_data_session {
            if let Some(voice_id) = self.voice_call_id() {
                if voice_id != call_id {
                    tracing::info!("Rejecting INVITE from {:?}: busy", msg.header("From"));
                    host.send_response(msg, 486, "Busy Here", &[], None);
                    return None;
                }
            }
        }

        if let Some(call) = self.calls.get(&call_id) {
            if call.with == self.config().self_uri {
                host.send_response(msg, 488, "Not Acceptable Here", &[], None);
                return None;
            }
        }

        let remote_sdp = match sdp::parse(&msg.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Malformed SDP in INVITE {}: {}", call_id, e);
                host.send_response(msg, 488, "Not Acceptable Here", &[], None);
                if self.calls.contains_key(&call_id) {
                    host.hangup_media(&call_id, false);
                }
                return None;
            }
        };

        if !self.calls.contains_key(&call_id) {
            self.new_incoming_call(host, msg, remote_sdp.ice_version, is_data_session);
        }

        let call = self.calls.get_mut(&call_id)?;
        call.invitation = Some(msg.clone());

        // Create streams for any new media section with a non-zero port.
        let new_sections: Vec<(String, MediaType)> = remote_sdp
            .media
            .iter()
            .filter(|media| media.port != 0 && call.stream(&media.name).is_none())
            .filter_map(|media| {
                media_type_for_section(&media.name).map(|t| (media.name.clone(), t))
            })
            .collect();

        let mut has_new_media = false;
        for (stream_id, media_type) in new_sections {
            if !self.add_stream(
                host,
                &call_id,
                &stream_id,
                media_type,
                remote_sdp.ice_version,
                false,
            ) {
                host.notify_error("Error occurred", "Error creating media stream");
                host.send_response(msg, 488, "Not Acceptable Here", &[], None);
                host.hangup_media(&call_id, false);
                self.drop_call(&call_id);
                return None;
            }

            let stream = self.calls.get_mut(&call_id)?.stream_mut(&stream_id)?;
            match stream_id.as_str() {
                "data" => stream.add_extra_attribute("recvonly", ""),
                "applicationsharing" => {
                    stream.add_extra_attribute("x-applicationsharing-session-id", "1");
                    stream.add_extra_attribute("x-applicationsharing-role", "viewer");
                    stream.add_extra_attribute("x-applicationsharing-media-type", "rdp");
                }
                _ => {}
            }
            has_new_media = true;
        }

        if has_new_media {
            let call = self.calls.get_mut(&call_id)?;
            call.pending_remote = Some(remote_sdp);
            call.state = CallState::RemoteOffering;
            host.send_response(msg, 180, "Ringing", &[], None);
            // Processing continues in stream_initialized.
        } else {
            // Re-INVITE on an established call: answer right away.
            self.apply_remote_message(host, &call_id, remote_sdp);
            self.send_response_with_sdp(host, &call_id, 200, "OK");
        }

        Some(call_id)
    }

    /// CANCEL for a ringing inbound call.
    pub fn process_incoming_cancel(&mut self, host: &mut dyn MediaHost, msg: &SipMessage) {
        let Some(call) = msg.call_id().and_then(|id| self.calls.get_mut(id)) else {
            return;
        };

        // 200 OK for the CANCEL itself, 487 for the INVITE in progress.
        host.send_response(msg, 200, "OK", &[], None);
        if let Some(invitation) = call.invitation.clone() {
            host.send_response(&invitation, 487, "Request Terminated", &[], None);
        }
        call.state = CallState::Terminated;
        let call_id = call.id.clone();
        host.reject_media(&call_id, false);
    }

    /// BYE from the remote party.
    pub fn process_incoming_bye(&mut self, host: &mut dyn MediaHost, msg: &SipMessage) {
        let Some(call) = msg.call_id().and_then(|id| self.calls.get_mut(id)) else {
            return;
        };
        host.send_response(msg, 200, "OK", &[], None);
        call.state = CallState::Terminating;
        let call_id = call.id.clone();
        host.hangup_media(&call_id, false);
    }

    /// Apply a remote session description to the call's streams. Sections
    /// that cannot be applied are retained as failed and the corresponding
    /// stream ends. Returns false when every section failed (the call ends).
    pub(crate) fn apply_remote_message(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        remote: SdpMessage,
    ) -> bool {
        let server_default = self.config().server_av_encryption_policy;
        let effective = effective_encryption_policy(host, server_default);

        let Some(call) = self.calls.get_mut(call_id) else {
            return false;
        };
        call.failed_media.clear();
        call.encryption_compatible = true;

        let mut survivors = 0usize;
        for mut media in remote.media {
            if media.attribute("encryption") == Some("rejected")
                && effective == EncryptionPolicy::Required
            {
                call.encryption_compatible = false;
            }

            if update_stream_from_remote(host, call, &media) {
                survivors += 1;
            } else {
                // Declined: echoed back with port 0 until the answer is sent.
                media.port = 0;
                call.failed_media.push(media);
            }
        }

        survivors != 0
    }

    /// Gated answer for an inbound call: needs local acceptance and every
    /// stream initialised. Encryption mismatch turns into a 488 here.
    pub(crate) fn send_invite_response_if_ready(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
    ) -> bool {
        let Some(call) = self.calls.get(call_id) else {
            return false;
        };
        if !host.media_accepted(call_id) || !call_initialized(&*host, call) {
            return false;
        }

        if !call.encryption_compatible {
            if let Some(invitation) = call.invitation.clone() {
                host.send_response(
                    &invitation,
                    488,
                    "Encryption Levels not compatible",
                    &[(
                        "Warning",
                        "308 lcs.microsoft.com \"Encryption Levels not compatible\"",
                    )],
                    None,
                );
            }
            host.reject_media(call_id, false);
            host.notify_error(
                "Unable to establish a call",
                "Encryption settings of peer are incompatible with ours.",
            );
        } else {
            self.send_response_with_sdp(host, call_id, 200, "OK");
            if let Some(call) = self.calls.get_mut(call_id) {
                call.state = CallState::Established;
            }
        }

        true
    }

    fn send_response_with_sdp(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        code: u16,
        reason: &str,
    ) {
        let Some(sdp) = self.build_sdp_message(host, call_id) else {
            return;
        };
        let body = sdp.serialize();
        let Some(invitation) = self.calls.get(call_id).and_then(|c| c.invitation.clone()) else {
            return;
        };
        host.send_response(
            &invitation,
            code,
            reason,
            &[("Content-Type", "application/sdp")],
            Some(&body),
        );
    }

    /// Backend finished gathering candidates for one stream.
    pub fn stream_initialized(&mut self, host: &mut dyn MediaHost, call_id: &str, stream_id: &str) {
        tracing::debug!("Stream {} of call {} initialised", stream_id, call_id);
        let Some(call) = self.calls.get(call_id) else {
            return;
        };
        if !call_initialized(&*host, call) {
            return;
        }

        if call.initiator {
            self.send_call_invite(
                host,
                call_id,
                Continuation::InviteResponse {
                    call_id: call_id.to_string(),
                },
            );
        } else if let Some(remote) = self.calls.get_mut(call_id).and_then(|c| c.pending_remote.take())
        {
            if self.apply_remote_message(host, call_id, remote) {
                self.send_invite_response_if_ready(host, call_id);
            }
        }
    }

    /// Backend reports a usable candidate pair. The initiator commits the
    /// chosen candidates with a re-offer; file-transfer receivers start the
    /// download handshake.
    pub fn candidate_pair_established(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        stream_id: &str,
    ) {
        let Some(call) = self.calls.get(call_id) else {
            return;
        };

        if call.initiator && call.state == CallState::LocalOffering {
            self.send_call_invite(
                host,
                call_id,
                Continuation::FinalAck {
                    call_id: call_id.to_string(),
                },
            );
        }

        if stream_id == "data" {
            self.ft_on_candidate_pair(host, call_id);
        }
    }

    /// Response to a request we sent, routed by its continuation.
    pub fn process_transaction_response(
        &mut self,
        host: &mut dyn MediaHost,
        continuation: Continuation,
        transaction: Transaction,
        msg: &SipMessage,
    ) {
        match continuation {
            Continuation::InviteResponse { call_id } => {
                self.process_invite_response(host, &call_id, transaction, msg)
            }
            Continuation::ReinviteAck { call_id } => {
                self.send_dialog_ack(host, &call_id, transaction);
                if let Some(call) = self.calls.get_mut(&call_id) {
                    if call.state == CallState::Reinviting {
                        call.state = CallState::Established;
                    }
                }
            }
            Continuation::FinalAck { call_id } => {
                if self.send_dialog_ack(host, &call_id, transaction) {
                    host.accept_media(&call_id, false);
                    if let Some(call) = self.calls.get_mut(&call_id) {
                        call.state = CallState::Established;
                        tracing::info!("Call {} with {} established", call_id, call.with);
                    }
                }
            }
            Continuation::RelayCredentials => self.process_relay_credentials_response(host, msg),
            Continuation::FtCancel { call_id } => self.ft_cancel_completed(host, &call_id),
        }
    }

    /// ACK the response. The transaction already advanced the dialog CSeq,
    /// so the ACK goes out under the transaction's CSeq.
    fn send_dialog_ack(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        transaction: Transaction,
    ) -> bool {
        let Some(call) = self.calls.get_mut(call_id) else {
            return false;
        };
        let saved_cseq = call.dialog.cseq;
        call.dialog.cseq = transaction.cseq.saturating_sub(1);
        host.send_ack(&mut call.dialog);
        call.dialog.cseq = saved_cseq;
        true
    }

    fn process_invite_response(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        transaction: Transaction,
        msg: &SipMessage,
    ) {
        let code = msg.response_code().unwrap_or(0);
        if code < 200 {
            return;
        }
        if code >= 400 {
            let Some(call) = self.calls.get(call_id) else {
                return;
            };
            let with = call.with.clone();
            self.handle_invite_failure(host, call_id, &with, transaction, msg, code);
            return;
        }

        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };
        call.dialog.update_from_response(msg);

        let remote = match sdp::parse(&msg.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Malformed SDP in response for call {}: {}", call_id, e);
                self.send_dialog_ack(host, call_id, transaction);
                host.hangup_media(call_id, false);
                self.drop_call(call_id);
                return;
            }
        };

        self.apply_remote_message(host, call_id, remote);
        self.send_dialog_ack(host, call_id, transaction);

        // Waits until candidate_pair_established is invoked.
    }

    fn handle_invite_failure(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        with: &str,
        transaction: Transaction,
        msg: &SipMessage,
        code: u16,
    ) {
        let mut title = "Error occurred";
        let mut description = String::new();
        let mut append_response_str = false;

        match code {
            480 => {
                title = "User unavailable";
                if msg.warning_code() == Some(391) {
                    description = format!("{} does not want to be disturbed", with);
                } else {
                    description = format!("User {} is not available", with);
                }
            }
            603 | 605 => {
                title = "Call rejected";
                description = format!("User {} rejected call", with);
            }
            415 => {
                // OCS/Lync really sends the response string with the
                // 'Mutipart' typo.
                if msg.reason()
                    == "Mutipart mime in content type not supported by Archiving CDR service"
                    && self.maybe_retry_with_ice_version(
                        host,
                        call_id,
                        IceVersion::Draft6,
                        transaction,
                    )
                {
                    return;
                }
                title = "Unsupported media type";
            }
            488 => {
                // Lync 2010 reports incompatible encryption as
                //   ms-client-diagnostics: 52017;reason="Encryption levels dont match"
                // older clients as the literal response string.
                let client_diag = msg.header("ms-client-diagnostics");
                if msg.reason() == "Encryption Levels not compatible"
                    || client_diag.is_some_and(|d| d.starts_with("52017;"))
                {
                    title = "Unable to establish a call";
                    description =
                        "Encryption settings of peer are incompatible with ours.".to_string();
                } else {
                    // A conference rejecting ICEv6 with "Error parsing SDP"
                    // wants ICEv19.
                    let retry_version = if msg
                        .header("ms-diagnostics")
                        .is_some_and(|d| d.starts_with("7008;"))
                    {
                        IceVersion::Rfc5245
                    } else {
                        IceVersion::Draft6
                    };
                    if self.maybe_retry_with_ice_version(host, call_id, retry_version, transaction)
                    {
                        return;
                    }
                    description = "Unable to establish a call".to_string();
                    append_response_str = true;
                }
            }
            _ => {
                description = "Unable to establish a call".to_string();
                append_response_str = true;
            }
        }

        if append_response_str {
            description.push_str(&format!("\n{} {}", code, msg.reason()));
            if let Some(reason) = msg.ms_diagnostics_reason() {
                description.push_str(&format!("\n\n{}", reason));
            }
        }

        host.notify_error(title, &description);
        self.send_dialog_ack(host, call_id, transaction);
        host.hangup_media(call_id, false);
        self.drop_call(call_id);
    }

    /// Hang up and re-dial under the other ICE dialect. Only the very first
    /// request of a call (CSeq 1) is eligible.
    fn maybe_retry_with_ice_version(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        ice_version: IceVersion,
        transaction: Transaction,
    ) -> bool {
        let Some(call) = self.calls.get(call_id) else {
            return false;
        };
        if call.ice_version == ice_version || transaction.cseq != 1 {
            return false;
        }

        let with = call.with.clone();
        let with_video = call.stream("video").is_some();

        host.hangup_media(call_id, false);
        self.drop_call(call_id);

        tracing::info!("Retrying call with ICEv{}.", ice_version.number());
        self.initiate_call_with_ice(host, &with, ice_version, with_video);
        true
    }

    /// Toggle local hold on a stream; a no-op when the stream is already in
    /// the requested state.
    pub fn set_stream_held(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        stream_id: &str,
        held: bool,
    ) {
        if self.calls.get(call_id).and_then(|c| c.stream(stream_id)).is_none() {
            return;
        }
        if host.stream_is_held(call_id, stream_id) == held {
            return;
        }
        if held {
            host.hold_stream(call_id, stream_id, true);
        } else {
            host.unhold_stream(call_id, stream_id, true);
        }
        self.call_hold(host, call_id, true);
    }

    /// Hold state changed; a local change triggers the hold re-INVITE.
    pub fn call_hold(&mut self, host: &mut dyn MediaHost, call_id: &str, local: bool) {
        if local {
            self.send_call_invite(
                host,
                call_id,
                Continuation::ReinviteAck {
                    call_id: call_id.to_string(),
                },
            );
        }
    }

    /// The user answered (or the backend auto-answered) the call.
    pub fn call_accepted(&mut self, host: &mut dyn MediaHost, call_id: &str, local: bool) {
        if local {
            self.send_invite_response_if_ready(host, call_id);
        }
    }

    /// The user declined the call.
    pub fn call_rejected(&mut self, host: &mut dyn MediaHost, call_id: &str, local: bool) {
        if !local {
            return;
        }
        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };
        if let Some(invitation) = call.invitation.clone() {
            host.send_response(&invitation, 603, "Decline", &[], None);
        }
        call.state = CallState::Terminated;
    }

    /// The user hung up.
    pub fn call_hangup(&mut self, _host: &mut dyn MediaHost, call_id: &str, local: bool) {
        if local {
            if let Some(call) = self.calls.get_mut(call_id) {
                call.state = CallState::Terminating;
            }
        }
    }

    /// Fatal backend error on a call.
    pub fn call_error(&mut self, host: &mut dyn MediaHost, call_id: &str, message: &str) {
        let Some(call) = self.calls.get(call_id) else {
            return;
        };
        let title = format!("Call with {} failed", call.with);
        host.notify_error(&title, message);

        let accepted = host.media_accepted(call_id);
        if !call.initiator && !accepted {
            if let Some(invitation) = call.invitation.clone() {
                host.send_response(&invitation, 488, "Not Acceptable Here", &[], None);
            }
        }
        host.hangup_media(call_id, call.initiator || accepted);
    }

    /// Sign-out sweep: unanswered inbound calls get 480, everything is hung
    /// up.
    pub fn handle_going_offline(&mut self, host: &mut dyn MediaHost) {
        let call_ids: Vec<String> = self.calls.keys().cloned().collect();
        for call_id in call_ids {
            let Some(call) = self.calls.get(&call_id) else {
                continue;
            };
            let accepted = host.media_accepted(&call_id);
            if !call.initiator && !accepted {
                if let Some(invitation) = call.invitation.clone() {
                    host.send_response(&invitation, 480, "Temporarily Unavailable", &[], None);
                }
            }
            host.hangup_media(&call_id, call.initiator || accepted);
        }
    }
}

fn phone_number_is_valid(phone_number: &str) -> bool {
    let digits = phone_number.strip_prefix('+').unwrap_or(phone_number);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Apply one remote media section to its stream. Returns false when the
/// section must be declined.
fn update_stream_from_remote(
    host: &mut dyn MediaHost,
    call: &mut MediaCall,
    media: &SdpMedia,
) -> bool {
    let call_id = call.id.clone();

    if media.port == 0 {
        if call.stream(&media.name).is_some() {
            host.end_stream(&call_id, &media.name);
            call.streams.retain(|s| s.id != media.name);
        }
        return true;
    }

    let Some(stream) = call.stream_mut(&media.name) else {
        return false;
    };

    if media.attribute("inactive").is_some() {
        host.hold_stream(&call_id, &media.name, false);
    } else if host.stream_is_held(&call_id, &media.name) {
        host.unhold_stream(&call_id, &media.name, false);
    }

    if stream.remote_set {
        return true;
    }

    if let (Some(remote_key), Some(local_key)) = (&media.encryption_key, &stream.encryption_key) {
        host.set_encryption_keys(&call_id, &media.name, local_key, remote_key);
        stream.encryption_key_id = media.encryption_key_id;
    }

    if !host.set_remote_codecs(&call_id, &media.name, &media.codecs) {
        tracing::info!(
            "Backend refused all codecs of section {} in call {}",
            media.name,
            call_id
        );
        host.end_stream(&call_id, &media.name);
        call.streams.retain(|s| s.id != media.name);
        return false;
    }

    host.add_remote_candidates(&call_id, &media.name, &media.candidates);
    stream.remote_set = true;

    true
}
