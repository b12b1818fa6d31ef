//! Lync file transfer — a hidden media call with a single `data` stream,
//! an XML control channel over SIP INFO and a 3-byte frame header on the
//! stream itself.
//!
//! Control flow: the sender publishes the file inside the INVITE, the
//! receiver answers `success` and asks to `downloadFile`, the sender
//! acknowledges `pending` and pumps framed chunks. The receiver reports
//! completion with a `fileTransferProgress` notify and the sender hangs up.

use std::io::Cursor;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::backend::{Continuation, IceVersion, MediaHost, MediaType};
use crate::calling::sdp::rand_u32;
use crate::calling::{MediaSession, StreamOverlay};
use crate::sip::mime;
use crate::sip::SipMessage;

const FT_NS: &str = "http://schemas.microsoft.com/rtc/2009/05/filetransfer";
const FT_CONTENT_TYPE_HEADER: &str = "Content-Type: application/ms-filetransfer+xml\r\n";

/// File id published in outgoing transfers.
const FT_FILE_ID: &str = "{6244F934-2EB1-443F-8E2C-48BA64AF463D}";

/// Sender-side chunk size. Frames carry a 16-bit length, so this stays a
/// comfortable power of two below that bound.
const FT_CHUNK_SIZE: usize = 1024;

/// Receiver-side drain buffer.
const FT_READ_BUFFER: usize = 0x800;

/// Frame types of the data-plane framing.
const FRAME_DATA: u8 = 0x00;
const FRAME_START: u8 = 0x01;
const FRAME_END: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtDirection {
    Incoming,
    Outgoing,
}

/// Per-stream file-transfer state, attached to the `data` stream as its
/// overlay.
#[derive(Debug)]
pub struct FileTransfer {
    pub direction: FtDirection,
    pub file_name: String,
    pub file_id: String,
    pub file_size: u64,
    /// Current ms-filetransfer request id on this dialog.
    pub request_id: u32,
    /// Bytes still owed from the current data frame.
    expecting_len: usize,
    bytes_received: u64,
    was_cancelled: bool,
    progress_notified: bool,
}

impl FileTransfer {
    fn new(direction: FtDirection, file_name: &str, file_id: &str, file_size: u64,
           request_id: u32) -> Self {
        FileTransfer {
            direction,
            file_name: file_name.to_string(),
            file_id: file_id.to_string(),
            file_size,
            request_id,
            expecting_len: 0,
            bytes_received: 0,
            was_cancelled: false,
            progress_notified: false,
        }
    }
}

impl MediaSession {
    /// Offer a file to `who`. Creates the hidden data call; the INVITE with
    /// the `publishFile` part goes out once the stream initialises.
    pub fn start_file_transfer(
        &mut self,
        host: &mut dyn MediaHost,
        who: &str,
        file_name: &str,
        file_size: u64,
    ) -> Option<String> {
        self.ft_request_id_seq += 1;
        let request_id = self.ft_request_id_seq;

        let call_id = self.new_outgoing_call(host, who, IceVersion::Rfc5245, true);

        if !self.add_stream(
            host,
            &call_id,
            "data",
            MediaType::Application,
            IceVersion::Rfc5245,
            true,
        ) {
            host.notify_error("Error occurred", "Error creating data stream");
            host.hangup_media(&call_id, false);
            self.drop_call(&call_id);
            return None;
        }

        let call = self.calls.get_mut(&call_id)?;
        let stream = call.stream_mut("data")?;
        stream.add_extra_attribute("sendonly", "");
        stream.add_extra_attribute("mid", "1");
        stream.overlay = StreamOverlay::FileTransfer(FileTransfer::new(
            FtDirection::Outgoing,
            file_name,
            FT_FILE_ID,
            file_size,
            request_id,
        ));

        let publish = build_publish_file(request_id, FT_FILE_ID, file_name, file_size);
        call.set_extra_invite_section(
            "multipart/mixed",
            format!(
                "Content-Type: application/ms-filetransfer+xml\r\n\
                 Content-Transfer-Encoding: 7bit\r\n\
                 Content-Disposition: render; handling=optional\r\n\
                 \r\n\
                 {}",
                publish
            ),
        );

        // Processing continues in stream_initialized.
        Some(call_id)
    }

    /// Inbound file-transfer INVITE: multipart body with a `publishFile`
    /// part and an SDP part.
    pub(crate) fn process_incoming_invite_file_transfer(
        &mut self,
        host: &mut dyn MediaHost,
        msg: &SipMessage,
    ) {
        let content_type = msg.header("Content-Type").unwrap_or("").to_string();

        let mut publish = None;
        let mut sdp_body = None;
        for part in mime::parts(&content_type, &msg.body) {
            let part_type = part.content_type().unwrap_or("");
            if part_type.starts_with("application/ms-filetransfer+xml") {
                if let Some(FtMessage::PublishFile {
                    request_id,
                    file_id,
                    file_name,
                    file_size,
                }) = parse_ft_message(part.body)
                {
                    publish = Some((request_id, file_id, file_name, file_size));
                }
            } else if part_type.starts_with("application/sdp") {
                sdp_body = Some(part.body.to_string());
            }
        }

        let (Some((request_id, file_id, file_name, file_size)), Some(sdp_body)) =
            (publish, sdp_body)
        else {
            host.send_response(msg, 488, "Not Acceptable Here", &[], None);
            return;
        };
        if file_name.is_empty() || file_size == 0 {
            host.send_response(msg, 488, "Not Acceptable Here", &[], None);
            return;
        }

        // Hand the SDP part to the regular call path.
        let mut call_invite = msg.clone();
        call_invite.body = sdp_body;
        let Some(call_id) = self.process_incoming_invite_call(host, &call_invite) else {
            host.send_response(msg, 500, "Server Internal Error", &[], None);
            return;
        };

        let Some(call) = self.calls.get_mut(&call_id) else {
            return;
        };
        let with = call.with.clone();
        let Some(stream) = call.stream_mut("data") else {
            return;
        };
        stream.overlay = StreamOverlay::FileTransfer(FileTransfer::new(
            FtDirection::Incoming,
            &file_name,
            &file_id,
            file_size,
            request_id,
        ));

        host.ft_incoming(&call_id, &with, &file_name, file_size);
    }

    /// The user accepted an incoming transfer.
    pub fn accept_file_transfer(&mut self, host: &mut dyn MediaHost, call_id: &str) {
        host.accept_media(call_id, true);
        self.call_accepted(host, call_id, true);
    }

    /// The user declined an incoming transfer.
    pub fn decline_file_transfer(&mut self, host: &mut dyn MediaHost, call_id: &str) {
        host.reject_media(call_id, true);
        self.call_rejected(host, call_id, true);
    }

    /// Data path is up: the receiver confirms the publish and requests the
    /// download.
    pub(crate) fn ft_on_candidate_pair(&mut self, host: &mut dyn MediaHost, call_id: &str) {
        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };
        let Some(request_id) = call
            .stream("data")
            .and_then(|s| s.file_transfer())
            .filter(|ft| ft.direction == FtDirection::Incoming)
            .map(|ft| ft.request_id)
        else {
            return;
        };

        let success = build_response(request_id, "success", None);
        host.send_info(&mut call.dialog, FT_CONTENT_TYPE_HEADER, &success, None);

        let (download_id, file_id, file_name) = {
            let ft = call
                .stream_mut("data")
                .and_then(|s| s.file_transfer_mut())
                .expect("overlay checked above");
            ft.request_id += 1;
            (ft.request_id, ft.file_id.clone(), ft.file_name.clone())
        };
        let download = build_download_file(download_id, &file_id, &file_name);
        host.send_info(&mut call.dialog, FT_CONTENT_TYPE_HEADER, &download, None);
    }

    /// SIP INFO on a file-transfer dialog.
    pub fn process_incoming_info(&mut self, host: &mut dyn MediaHost, msg: &SipMessage) {
        let Some(call_id) = msg.call_id().map(str::to_string) else {
            return;
        };
        let Some(direction) = self
            .calls
            .get(&call_id)
            .and_then(|c| c.stream("data"))
            .and_then(|s| s.file_transfer())
            .map(|ft| ft.direction)
        else {
            return;
        };
        let Some(parsed) = parse_ft_message(&msg.body) else {
            return;
        };

        host.send_response(msg, 200, "OK", &[], None);

        match (direction, parsed) {
            (
                FtDirection::Incoming,
                FtMessage::Response {
                    request_id,
                    code,
                    reason,
                },
            ) => self.ft_process_response(host, &call_id, request_id, &code, reason.as_deref()),
            (FtDirection::Outgoing, FtMessage::DownloadFile { request_id }) => {
                self.ft_process_download_request(host, &call_id, request_id)
            }
            (FtDirection::Outgoing, FtMessage::Notify { progress_to }) => {
                self.ft_process_notify(host, &call_id, progress_to)
            }
            (_, FtMessage::CancelTransfer { request_id }) => {
                self.ft_process_cancel_request(host, &call_id, request_id)
            }
            _ => {}
        }
    }

    fn ft_process_response(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        request_id: u32,
        code: &str,
        reason: Option<&str>,
    ) {
        let Some(ft) = self.ft_mut(call_id) else {
            return;
        };
        if request_id != ft.request_id {
            return;
        }

        match code {
            "success" => {
                // Transfer concluded; the sender hangs up, we just let the
                // overlay go.
                tracing::info!("File transfer on call {} completed", call_id);
                if let Some(stream) =
                    self.calls.get_mut(call_id).and_then(|c| c.stream_mut("data"))
                {
                    stream.overlay = StreamOverlay::None;
                }
            }
            "failure" => {
                if reason == Some("requestCancelled") {
                    host.ft_cancelled_by_remote(call_id);
                }
            }
            _ => {}
        }
    }

    fn ft_process_download_request(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        request_id: u32,
    ) {
        {
            let Some(ft) = self.ft_mut(call_id) else {
                return;
            };
            ft.request_id = request_id;
        }

        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };
        let pending = build_response(request_id, "pending", None);
        host.send_info(&mut call.dialog, FT_CONTENT_TYPE_HEADER, &pending, None);

        // Announce the stream, then let the pump move the bytes.
        write_frame(host, call_id, FRAME_START, request_id.to_string().as_bytes());
        host.ft_start(call_id);
        host.schedule_write_pump(call_id);
    }

    /// Sender-side write pump, driven from the host's idle source. Returns
    /// false once there is nothing left to write.
    pub fn pump_file_transfer(&mut self, host: &mut dyn MediaHost, call_id: &str) -> bool {
        let Some(request_id) = self.ft_mut(call_id).and_then(|ft| {
            if ft.was_cancelled {
                None
            } else {
                Some(ft.request_id)
            }
        }) else {
            return false;
        };

        let mut buffer = [0u8; FT_CHUNK_SIZE];
        let read = host.ft_read(call_id, &mut buffer);
        if read != 0 {
            write_frame(host, call_id, FRAME_DATA, &buffer[..read]);
        }

        if host.ft_completed(call_id) {
            write_frame(host, call_id, FRAME_END, request_id.to_string().as_bytes());
            return false;
        }

        true
    }

    fn ft_process_notify(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        progress_to: Option<u64>,
    ) {
        let Some(ft) = self.ft_mut(call_id) else {
            return;
        };
        if progress_to != Some(ft.file_size.saturating_sub(1)) {
            return;
        }
        let request_id = ft.request_id;

        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };
        let success = build_response(request_id, "success", None);
        host.send_info(&mut call.dialog, FT_CONTENT_TYPE_HEADER, &success, None);

        // This also sends BYE to the other party.
        host.hangup_media(call_id, true);
    }

    fn ft_process_cancel_request(
        &mut self,
        host: &mut dyn MediaHost,
        call_id: &str,
        request_id: u32,
    ) {
        {
            let Some(ft) = self.ft_mut(call_id) else {
                return;
            };
            ft.was_cancelled = true;
        }
        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };
        let failure = build_response(request_id, "failure", Some("requestCancelled"));
        host.send_info(&mut call.dialog, FT_CONTENT_TYPE_HEADER, &failure, None);
        host.ft_cancelled_by_remote(call_id);
    }

    /// Cancel a transfer locally. Incoming data keeps being drained and
    /// discarded until the peer's BYE.
    pub fn cancel_file_transfer(&mut self, host: &mut dyn MediaHost, call_id: &str) {
        let Some(call) = self.calls.get_mut(call_id) else {
            return;
        };
        let Some((request_id, transfer_id, file_id, file_name)) = call
            .stream_mut("data")
            .and_then(|s| s.file_transfer_mut())
            .map(|ft| {
                ft.was_cancelled = true;
                (
                    ft.request_id + 1,
                    ft.request_id,
                    ft.file_id.clone(),
                    ft.file_name.clone(),
                )
            })
        else {
            return;
        };

        let cancel = build_cancel_transfer(request_id, transfer_id, &file_id, &file_name);
        host.send_info(
            &mut call.dialog,
            FT_CONTENT_TYPE_HEADER,
            &cancel,
            Some(Continuation::FtCancel {
                call_id: call_id.to_string(),
            }),
        );
    }

    /// The peer answered our cancelTransfer; tear the call down.
    pub(crate) fn ft_cancel_completed(&mut self, host: &mut dyn MediaHost, call_id: &str) {
        host.hangup_media(call_id, true);
    }

    /// Receiver-side framing state machine, driven by read-available events
    /// on the data stream.
    pub fn read_available(&mut self, host: &mut dyn MediaHost, call_id: &str, stream_id: &str) {
        if stream_id != "data" {
            return;
        }
        let Some((was_cancelled, expecting_len)) = self
            .ft_mut(call_id)
            .map(|ft| (ft.was_cancelled, ft.expecting_len))
        else {
            return;
        };

        if was_cancelled {
            let mut buffer = [0u8; FT_READ_BUFFER];
            host.read_stream(call_id, "data", &mut buffer, false);
            return;
        }

        if expecting_len == 0 {
            let mut frame_type = [0u8; 1];
            host.read_stream(call_id, "data", &mut frame_type, true);
            let mut len = [0u8; 2];
            host.read_stream(call_id, "data", &mut len, true);
            let size = u16::from_be_bytes(len) as usize;

            match frame_type[0] {
                FRAME_START => {
                    let mut buffer = vec![0u8; size];
                    host.read_stream(call_id, "data", &mut buffer, true);
                    tracing::info!(
                        "Received new stream for requestId: {}",
                        String::from_utf8_lossy(&buffer)
                    );
                    host.ft_start(call_id);
                }
                FRAME_END => {
                    let mut buffer = vec![0u8; size];
                    host.read_stream(call_id, "data", &mut buffer, true);
                    tracing::info!(
                        "Received end of stream for requestId: {}",
                        String::from_utf8_lossy(&buffer)
                    );
                }
                FRAME_DATA => {
                    tracing::debug!("Received new data chunk of size {}", size);
                    if let Some(ft) = self.ft_mut(call_id) {
                        ft.expecting_len = size;
                    }
                }
                other => tracing::warn!("Unknown file-transfer frame type {:#x}", other),
            }
            // Readable fires again for the rest of the frame.
        } else {
            let mut buffer = [0u8; FT_READ_BUFFER];
            let wanted = expecting_len.min(FT_READ_BUFFER);
            let read = host.read_stream(call_id, "data", &mut buffer[..wanted], false);
            host.ft_write(call_id, &buffer[..read]);

            let Some(ft) = self.ft_mut(call_id) else {
                return;
            };
            ft.expecting_len -= read;
            ft.bytes_received += read as u64;
            tracing::debug!(
                "Read {} bytes, {} remaining in chunk",
                read,
                ft.expecting_len
            );

            if ft.bytes_received >= ft.file_size && !ft.progress_notified {
                ft.progress_notified = true;
                let (request_id, to) = (ft.request_id, ft.file_size.saturating_sub(1));
                let notify = build_progress_notify(rand_u32(), request_id, to);
                if let Some(call) = self.calls.get_mut(call_id) {
                    host.send_info(&mut call.dialog, FT_CONTENT_TYPE_HEADER, &notify, None);
                }
            }
        }
    }

    fn ft_mut(&mut self, call_id: &str) -> Option<&mut FileTransfer> {
        self.calls
            .get_mut(call_id)?
            .stream_mut("data")?
            .file_transfer_mut()
    }
}

/// Write one frame: type byte, 16-bit big-endian length, payload.
fn write_frame(host: &mut dyn MediaHost, call_id: &str, frame_type: u8, payload: &[u8]) {
    host.write_stream(call_id, "data", &[frame_type], true);
    host.write_stream(
        call_id,
        "data",
        &(payload.len() as u16).to_be_bytes(),
        true,
    );
    host.write_stream(call_id, "data", payload, true);
}

// ---------------------------------------------------------------------------
// ms-filetransfer XML
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub(crate) enum FtMessage {
    PublishFile {
        request_id: u32,
        file_id: String,
        file_name: String,
        file_size: u64,
    },
    DownloadFile {
        request_id: u32,
    },
    CancelTransfer {
        request_id: u32,
    },
    Response {
        request_id: u32,
        code: String,
        reason: Option<String>,
    },
    Notify {
        progress_to: Option<u64>,
    },
}

fn text_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .and_then(|_| writer.write_event(Event::Text(BytesText::new(text))))
        .and_then(|_| writer.write_event(Event::End(BytesStart::new(name).to_end())))
        .expect("in-memory XML write cannot fail");
}

fn file_info<W: std::io::Write>(writer: &mut Writer<W>, id: &str, name: &str, size: Option<u64>) {
    writer
        .write_event(Event::Start(BytesStart::new("fileInfo")))
        .expect("in-memory XML write cannot fail");
    text_element(writer, "id", id);
    text_element(writer, "name", name);
    if let Some(size) = size {
        text_element(writer, "size", &size.to_string());
    }
    writer
        .write_event(Event::End(BytesStart::new("fileInfo").to_end()))
        .expect("in-memory XML write cannot fail");
}

fn request_wrapper(request_id: u32, inner: &str, build: impl FnOnce(&mut Writer<Cursor<Vec<u8>>>)) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut request = BytesStart::new("request");
    let id = request_id.to_string();
    request.push_attribute(("xmlns", FT_NS));
    request.push_attribute(("requestId", id.as_str()));
    writer
        .write_event(Event::Start(request))
        .expect("in-memory XML write cannot fail");
    writer
        .write_event(Event::Start(BytesStart::new(inner)))
        .expect("in-memory XML write cannot fail");
    build(&mut writer);
    writer
        .write_event(Event::End(BytesStart::new(inner).to_end()))
        .expect("in-memory XML write cannot fail");
    writer
        .write_event(Event::End(BytesStart::new("request").to_end()))
        .expect("in-memory XML write cannot fail");
    String::from_utf8(writer.into_inner().into_inner()).expect("XML writer produced valid UTF-8")
}

fn build_publish_file(request_id: u32, file_id: &str, file_name: &str, file_size: u64) -> String {
    request_wrapper(request_id, "publishFile", |writer| {
        file_info(writer, file_id, file_name, Some(file_size));
    })
}

fn build_download_file(request_id: u32, file_id: &str, file_name: &str) -> String {
    request_wrapper(request_id, "downloadFile", |writer| {
        file_info(writer, file_id, file_name, None);
    })
}

fn build_cancel_transfer(
    request_id: u32,
    transfer_id: u32,
    file_id: &str,
    file_name: &str,
) -> String {
    request_wrapper(request_id, "cancelTransfer", |writer| {
        text_element(writer, "transferId", &transfer_id.to_string());
        file_info(writer, file_id, file_name, None);
    })
}

fn build_response(request_id: u32, code: &str, reason: Option<&str>) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut response = BytesStart::new("response");
    let id = request_id.to_string();
    response.push_attribute(("xmlns", FT_NS));
    response.push_attribute(("requestId", id.as_str()));
    response.push_attribute(("code", code));
    if let Some(reason) = reason {
        response.push_attribute(("reason", reason));
    }
    writer
        .write_event(Event::Empty(response))
        .expect("in-memory XML write cannot fail");
    String::from_utf8(writer.into_inner().into_inner()).expect("XML writer produced valid UTF-8")
}

fn build_progress_notify(notify_id: u32, transfer_id: u32, to: u64) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut notify = BytesStart::new("notify");
    let id = notify_id.to_string();
    notify.push_attribute(("xmlns", FT_NS));
    notify.push_attribute(("notifyId", id.as_str()));
    writer
        .write_event(Event::Start(notify))
        .expect("in-memory XML write cannot fail");
    writer
        .write_event(Event::Start(BytesStart::new("fileTransferProgress")))
        .expect("in-memory XML write cannot fail");
    text_element(&mut writer, "transferId", &transfer_id.to_string());
    writer
        .write_event(Event::Start(BytesStart::new("bytesReceived")))
        .expect("in-memory XML write cannot fail");
    text_element(&mut writer, "from", "0");
    text_element(&mut writer, "to", &to.to_string());
    writer
        .write_event(Event::End(BytesStart::new("bytesReceived").to_end()))
        .expect("in-memory XML write cannot fail");
    writer
        .write_event(Event::End(BytesStart::new("fileTransferProgress").to_end()))
        .expect("in-memory XML write cannot fail");
    writer
        .write_event(Event::End(BytesStart::new("notify").to_end()))
        .expect("in-memory XML write cannot fail");
    String::from_utf8(writer.into_inner().into_inner()).expect("XML writer produced valid UTF-8")
}

/// Parse one ms-filetransfer control message.
pub(crate) fn parse_ft_message(body: &str) -> Option<FtMessage> {
    let mut reader = Reader::from_str(body);
    let mut path: Vec<String> = Vec::new();

    let mut root = String::new();
    let mut request_id: Option<u32> = None;
    let mut code: Option<String> = None;
    let mut reason: Option<String> = None;
    let mut kind: Option<String> = None;
    let mut file_id = String::new();
    let mut file_name = String::new();
    let mut file_size: u64 = 0;
    let mut progress_to: Option<u64> = None;

    let mut handle_element = |path: &[String],
                              name: &str,
                              attrs: &[(String, String)],
                              kind: &mut Option<String>| {
        if path.is_empty() {
            for (attr_name, value) in attrs {
                match attr_name.as_str() {
                    "requestId" => request_id = value.parse().ok(),
                    "code" => code = Some(value.clone()),
                    "reason" => reason = Some(value.clone()),
                    _ => {}
                }
            }
        } else if matches!(name, "publishFile" | "downloadFile" | "cancelTransfer") {
            *kind = Some(name.to_string());
        }
    };

    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let attrs: Vec<(String, String)> = e
                    .attributes()
                    .flatten()
                    .filter_map(|a| {
                        Some((
                            String::from_utf8_lossy(a.key.local_name().as_ref()).to_string(),
                            a.unescape_value().ok()?.to_string(),
                        ))
                    })
                    .collect();
                handle_element(&path, &name, &attrs, &mut kind);
                if path.is_empty() {
                    root = name.clone();
                }
                path.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let attrs: Vec<(String, String)> = e
                    .attributes()
                    .flatten()
                    .filter_map(|a| {
                        Some((
                            String::from_utf8_lossy(a.key.local_name().as_ref()).to_string(),
                            a.unescape_value().ok()?.to_string(),
                        ))
                    })
                    .collect();
                handle_element(&path, &name, &attrs, &mut kind);
                if path.is_empty() {
                    root = name;
                }
            }
            Event::Text(e) => {
                let text = e.unescape().ok()?.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                let in_file_info = path.iter().any(|n| n == "fileInfo");
                match path.last().map(String::as_str) {
                    Some("id") if in_file_info => file_id = text,
                    Some("name") if in_file_info => file_name = text,
                    Some("size") if in_file_info => file_size = text.parse().unwrap_or(0),
                    Some("to") if path.iter().any(|n| n == "bytesReceived") => {
                        progress_to = text.parse().ok()
                    }
                    _ => {}
                }
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match root.as_str() {
        "request" => match kind.as_deref() {
            Some("publishFile") => Some(FtMessage::PublishFile {
                request_id: request_id?,
                file_id,
                file_name,
                file_size,
            }),
            Some("downloadFile") => Some(FtMessage::DownloadFile {
                request_id: request_id?,
            }),
            Some("cancelTransfer") => Some(FtMessage::CancelTransfer {
                request_id: request_id?,
            }),
            _ => None,
        },
        "response" => Some(FtMessage::Response {
            request_id: request_id?,
            code: code?,
            reason,
        }),
        "notify" => Some(FtMessage::Notify { progress_to }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_file_roundtrip() {
        let body = build_publish_file(4, FT_FILE_ID, "x.bin", 2048);
        assert!(body.contains("requestId=\"4\""));
        assert!(body.contains("<size>2048</size>"));

        let parsed = parse_ft_message(&body).unwrap();
        assert_eq!(
            parsed,
            FtMessage::PublishFile {
                request_id: 4,
                file_id: FT_FILE_ID.to_string(),
                file_name: "x.bin".to_string(),
                file_size: 2048,
            }
        );
    }

    #[test]
    fn test_parse_download_request() {
        let body = build_download_file(7, FT_FILE_ID, "x.bin");
        assert_eq!(
            parse_ft_message(&body),
            Some(FtMessage::DownloadFile { request_id: 7 })
        );
    }

    #[test]
    fn test_parse_response_with_reason() {
        let body = build_response(9, "failure", Some("requestCancelled"));
        assert_eq!(
            parse_ft_message(&body),
            Some(FtMessage::Response {
                request_id: 9,
                code: "failure".to_string(),
                reason: Some("requestCancelled".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_progress_notify() {
        let body = build_progress_notify(1234, 4, 2047);
        assert_eq!(
            parse_ft_message(&body),
            Some(FtMessage::Notify {
                progress_to: Some(2047)
            })
        );
    }

    #[test]
    fn test_cancel_transfer_references_both_ids() {
        let body = build_cancel_transfer(5, 4, FT_FILE_ID, "x.bin");
        assert!(body.contains("requestId=\"5\""));
        assert!(body.contains("<transferId>4</transferId>"));
        assert_eq!(
            parse_ft_message(&body),
            Some(FtMessage::CancelTransfer { request_id: 5 })
        );
    }
}
