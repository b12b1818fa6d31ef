//! Recording mock host for exercising the state machine in tests.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::backend::{
    Continuation, DnsResolver, EncryptionPolicy, FileTransferHost, IceVersion, MediaBackend,
    MediaType, Notifier, SipTransport, StreamSetup,
};
use crate::calling::sdp::{Candidate, CandidateType, Codec, Component, TransportProtocol};
use crate::sip::{Dialog, SipMessage};

#[derive(Debug, Clone)]
pub struct RecordedInvite {
    pub call_id: String,
    pub cseq: u32,
    pub headers: String,
    pub body: String,
    pub continuation: Continuation,
}

#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub call_id: Option<String>,
    pub code: u16,
    pub reason: String,
    pub extra_headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordedInfo {
    pub call_id: String,
    pub body: String,
    pub continuation: Option<Continuation>,
}

#[derive(Debug, Clone)]
pub struct StreamSetupRecord {
    pub call_id: String,
    pub stream_id: String,
    pub media_type: MediaType,
    pub ice_version: IceVersion,
    pub initiator: bool,
    pub relay_count: usize,
    pub min_port: u16,
    pub max_port: u16,
}

#[derive(Debug, Default)]
pub struct MockStream {
    pub initialized: bool,
    pub held: bool,
    pub ended: bool,
    pub remote_codecs: Vec<Codec>,
    pub remote_candidates: Vec<Candidate>,
    pub keys: Option<(Vec<u8>, Vec<u8>)>,
    pub inbox: VecDeque<u8>,
    pub outbox: Vec<u8>,
}

pub struct MockHost {
    // SIP wire
    pub invites: Vec<RecordedInvite>,
    pub responses: Vec<RecordedResponse>,
    pub acks: Vec<(String, u32)>,
    pub infos: Vec<RecordedInfo>,
    pub services: Vec<(String, String)>,
    pub notifications: Vec<(String, String)>,

    // Backend
    pub media_created: HashSet<String>,
    pub cnames: HashMap<String, String>,
    pub streams: HashMap<(String, String), MockStream>,
    pub stream_setups: Vec<StreamSetupRecord>,
    pub add_stream_ok: bool,
    /// New streams report initialised immediately.
    pub auto_initialize: bool,
    pub local_codecs: Vec<Codec>,
    pub local_candidates: Vec<Candidate>,
    pub active_local: HashMap<(String, String), Vec<Candidate>>,
    pub active_remote: HashMap<(String, String), Vec<Candidate>>,
    /// Stream ids whose remote codecs the backend refuses.
    pub refuse_remote_codecs: HashSet<String>,
    pub accepted: HashSet<String>,
    pub rejections: Vec<(String, bool)>,
    pub hangups: Vec<(String, bool)>,
    pub policy: EncryptionPolicy,
    pub ip: String,

    // DNS
    pub dns_queries: Vec<(u64, String, u16)>,
    pub cancelled_queries: Vec<u64>,
    next_dns_id: u64,

    // File transfer
    pub ft_source: Vec<u8>,
    pub ft_cursor: usize,
    pub ft_sink: Vec<u8>,
    pub ft_started: Vec<String>,
    pub ft_offers: Vec<(String, String, String, u64)>,
    pub ft_remote_cancels: Vec<String>,
    pub pumps_scheduled: Vec<String>,
}

impl MockHost {
    pub fn new() -> Self {
        MockHost {
            invites: Vec::new(),
            responses: Vec::new(),
            acks: Vec::new(),
            infos: Vec::new(),
            services: Vec::new(),
            notifications: Vec::new(),
            media_created: HashSet::new(),
            cnames: HashMap::new(),
            streams: HashMap::new(),
            stream_setups: Vec::new(),
            add_stream_ok: true,
            auto_initialize: true,
            local_codecs: vec![Codec {
                id: 0,
                name: "PCMU".to_string(),
                clock_rate: 8000,
                media_type: MediaType::Audio,
                parameters: Vec::new(),
            }],
            local_candidates: Self::default_candidates(),
            active_local: HashMap::new(),
            active_remote: HashMap::new(),
            refuse_remote_codecs: HashSet::new(),
            accepted: HashSet::new(),
            rejections: Vec::new(),
            hangups: Vec::new(),
            policy: EncryptionPolicy::ObeyServer,
            ip: "10.0.0.2".to_string(),
            dns_queries: Vec::new(),
            cancelled_queries: Vec::new(),
            next_dns_id: 0,
            ft_source: Vec::new(),
            ft_cursor: 0,
            ft_sink: Vec::new(),
            ft_started: Vec::new(),
            ft_offers: Vec::new(),
            ft_remote_cancels: Vec::new(),
            pumps_scheduled: Vec::new(),
        }
    }

    pub fn default_candidates() -> Vec<Candidate> {
        let rtp = Candidate {
            foundation: "1".to_string(),
            component: Component::Rtp,
            kind: CandidateType::Host,
            protocol: TransportProtocol::Udp,
            ip: "10.0.0.2".to_string(),
            port: 5000,
            base_ip: String::new(),
            base_port: 0,
            priority: 2130706431,
            username: "loCa".to_string(),
            password: "localpassword1234567890x".to_string(),
        };
        let mut rtcp = rtp.clone();
        rtcp.component = Component::Rtcp;
        rtcp.port = 5001;
        vec![rtp, rtcp]
    }

    pub fn stream(&self, call_id: &str, stream_id: &str) -> &MockStream {
        self.streams
            .get(&(call_id.to_string(), stream_id.to_string()))
            .expect("mock stream exists")
    }

    pub fn push_stream_data(&mut self, call_id: &str, stream_id: &str, data: &[u8]) {
        self.streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
            .expect("mock stream exists")
            .inbox
            .extend(data.iter().copied());
    }

    pub fn last_invite(&self) -> &RecordedInvite {
        self.invites.last().expect("an INVITE was sent")
    }
}

impl SipTransport for MockHost {
    fn send_invite(
        &mut self,
        dialog: &mut Dialog,
        headers: &str,
        body: &str,
        continuation: Continuation,
    ) -> u32 {
        dialog.cseq += 1;
        self.invites.push(RecordedInvite {
            call_id: dialog.call_id.clone(),
            cseq: dialog.cseq,
            headers: headers.to_string(),
            body: body.to_string(),
            continuation,
        });
        dialog.cseq
    }

    fn send_response(
        &mut self,
        request: &SipMessage,
        code: u16,
        reason: &str,
        extra_headers: &[(&str, &str)],
        body: Option<&str>,
    ) {
        self.responses.push(RecordedResponse {
            call_id: request.call_id().map(str::to_string),
            code,
            reason: reason.to_string(),
            extra_headers: extra_headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: body.map(str::to_string),
        });
    }

    fn send_ack(&mut self, dialog: &mut Dialog) {
        dialog.cseq += 1;
        self.acks.push((dialog.call_id.clone(), dialog.cseq));
    }

    fn send_info(
        &mut self,
        dialog: &mut Dialog,
        _headers: &str,
        body: &str,
        continuation: Option<Continuation>,
    ) {
        dialog.cseq += 1;
        self.infos.push(RecordedInfo {
            call_id: dialog.call_id.clone(),
            body: body.to_string(),
            continuation,
        });
    }

    fn send_service(&mut self, uri: &str, _headers: &str, body: &str, _continuation: Continuation) {
        self.services.push((uri.to_string(), body.to_string()));
    }
}

impl MediaBackend for MockHost {
    fn media_new(&mut self, call_id: &str, _with: &str, _initiator: bool, _hidden: bool) {
        self.media_created.insert(call_id.to_string());
    }

    fn set_cname(&mut self, call_id: &str, cname: &str) {
        self.cnames.insert(call_id.to_string(), cname.to_string());
    }

    fn add_stream(&mut self, call_id: &str, setup: &StreamSetup<'_>) -> bool {
        if !self.add_stream_ok {
            return false;
        }
        self.stream_setups.push(StreamSetupRecord {
            call_id: call_id.to_string(),
            stream_id: setup.id.to_string(),
            media_type: setup.media_type,
            ice_version: setup.ice_version,
            initiator: setup.initiator,
            relay_count: setup.relays.len(),
            min_port: setup.min_port,
            max_port: setup.max_port,
        });
        self.streams.insert(
            (call_id.to_string(), setup.id.to_string()),
            MockStream {
                initialized: self.auto_initialize,
                ..MockStream::default()
            },
        );
        true
    }

    fn local_codecs(&self, _call_id: &str, _stream_id: &str) -> Vec<Codec> {
        self.local_codecs.clone()
    }

    fn local_candidates(&self, _call_id: &str, _stream_id: &str) -> Vec<Candidate> {
        self.local_candidates.clone()
    }

    fn active_local_candidates(&self, call_id: &str, stream_id: &str) -> Vec<Candidate> {
        self.active_local
            .get(&(call_id.to_string(), stream_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn active_remote_candidates(&self, call_id: &str, stream_id: &str) -> Vec<Candidate> {
        self.active_remote
            .get(&(call_id.to_string(), stream_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn set_remote_codecs(&mut self, call_id: &str, stream_id: &str, codecs: &[Codec]) -> bool {
        if self.refuse_remote_codecs.contains(stream_id) {
            return false;
        }
        if let Some(stream) = self
            .streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
        {
            stream.remote_codecs = codecs.to_vec();
        }
        true
    }

    fn add_remote_candidates(&mut self, call_id: &str, stream_id: &str, candidates: &[Candidate]) {
        if let Some(stream) = self
            .streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
        {
            stream.remote_candidates = candidates.to_vec();
        }
    }

    fn set_encryption_keys(&mut self, call_id: &str, stream_id: &str, local: &[u8], remote: &[u8]) {
        if let Some(stream) = self
            .streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
        {
            stream.keys = Some((local.to_vec(), remote.to_vec()));
        }
    }

    fn stream_initialized(&self, call_id: &str, stream_id: &str) -> bool {
        self.streams
            .get(&(call_id.to_string(), stream_id.to_string()))
            .map(|s| s.initialized)
            .unwrap_or(false)
    }

    fn stream_is_held(&self, call_id: &str, stream_id: &str) -> bool {
        self.streams
            .get(&(call_id.to_string(), stream_id.to_string()))
            .map(|s| s.held)
            .unwrap_or(false)
    }

    fn hold_stream(&mut self, call_id: &str, stream_id: &str, _local: bool) {
        if let Some(stream) = self
            .streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
        {
            stream.held = true;
        }
    }

    fn unhold_stream(&mut self, call_id: &str, stream_id: &str, _local: bool) {
        if let Some(stream) = self
            .streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
        {
            stream.held = false;
        }
    }

    fn end_stream(&mut self, call_id: &str, stream_id: &str) {
        if let Some(stream) = self
            .streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
        {
            stream.ended = true;
        }
    }

    fn media_accepted(&self, call_id: &str) -> bool {
        self.accepted.contains(call_id)
    }

    fn accept_media(&mut self, call_id: &str, _local: bool) {
        self.accepted.insert(call_id.to_string());
    }

    fn reject_media(&mut self, call_id: &str, local: bool) {
        self.rejections.push((call_id.to_string(), local));
    }

    fn hangup_media(&mut self, call_id: &str, local: bool) {
        self.hangups.push((call_id.to_string(), local));
    }

    fn read_stream(
        &mut self,
        call_id: &str,
        stream_id: &str,
        buf: &mut [u8],
        _blocking: bool,
    ) -> usize {
        let Some(stream) = self
            .streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
        else {
            return 0;
        };
        let count = buf.len().min(stream.inbox.len());
        for slot in buf.iter_mut().take(count) {
            *slot = stream.inbox.pop_front().unwrap();
        }
        count
    }

    fn write_stream(&mut self, call_id: &str, stream_id: &str, buf: &[u8], _blocking: bool) {
        if let Some(stream) = self
            .streams
            .get_mut(&(call_id.to_string(), stream_id.to_string()))
        {
            stream.outbox.extend_from_slice(buf);
        }
    }

    fn encryption_policy(&self) -> EncryptionPolicy {
        self.policy
    }

    fn network_ip(&self) -> String {
        self.ip.clone()
    }
}

impl DnsResolver for MockHost {
    fn query_a(&mut self, hostname: &str, port: u16) -> u64 {
        self.next_dns_id += 1;
        self.dns_queries
            .push((self.next_dns_id, hostname.to_string(), port));
        self.next_dns_id
    }

    fn cancel_query(&mut self, query_id: u64) {
        self.cancelled_queries.push(query_id);
    }
}

impl FileTransferHost for MockHost {
    fn ft_incoming(&mut self, call_id: &str, with: &str, file_name: &str, size: u64) {
        self.ft_offers
            .push((call_id.to_string(), with.to_string(), file_name.to_string(), size));
    }

    fn ft_start(&mut self, call_id: &str) {
        self.ft_started.push(call_id.to_string());
    }

    fn ft_write(&mut self, _call_id: &str, data: &[u8]) {
        self.ft_sink.extend_from_slice(data);
    }

    fn ft_read(&mut self, _call_id: &str, buf: &mut [u8]) -> usize {
        let remaining = &self.ft_source[self.ft_cursor..];
        let count = buf.len().min(remaining.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.ft_cursor += count;
        count
    }

    fn ft_completed(&self, _call_id: &str) -> bool {
        self.ft_cursor >= self.ft_source.len()
    }

    fn ft_cancelled_by_remote(&mut self, call_id: &str) {
        self.ft_remote_cancels.push(call_id.to_string());
    }

    fn schedule_write_pump(&mut self, call_id: &str) {
        self.pumps_scheduled.push(call_id.to_string());
    }
}

impl Notifier for MockHost {
    fn notify_error(&mut self, title: &str, description: &str) {
        self.notifications
            .push((title.to_string(), description.to_string()));
    }
}
