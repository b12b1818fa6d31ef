//! Conference A/V join — derive the audio-video focus URI from the chat
//! session id and pick the ICE dialect the server generation understands.

use crate::backend::{IceVersion, MediaHost, MediaType};
use crate::calling::MediaSession;

impl MediaSession {
    /// Join the audio-video part of a conference. `focus_uri` is the chat
    /// session's `app:conf:focus:` URI; `supports_audio_video` reflects
    /// whether the focus advertised an audio-video MCU.
    pub fn connect_conference(
        &mut self,
        host: &mut dyn MediaHost,
        focus_uri: &str,
        supports_audio_video: bool,
    ) -> Option<String> {
        if !supports_audio_video {
            host.notify_error(
                "Join conference call",
                "Conference calls are not supported on this server.",
            );
            return None;
        }

        if self.voice_call_id().is_some() {
            return None;
        }

        let av_uri = focus_uri.replace("app:conf:focus:", "app:conf:audio-video:");

        // Lync 2013 focuses only talk RFC 5245; older ones only draft 6.
        let ice_version = if self.config().lync2013 {
            IceVersion::Rfc5245
        } else {
            IceVersion::Draft6
        };

        let call_id = self.new_outgoing_call(host, &av_uri, ice_version, false);

        if !self.add_stream(host, &call_id, "audio", MediaType::Audio, ice_version, true) {
            host.notify_error("Error occurred", "Error creating audio stream");
            host.hangup_media(&call_id, false);
            self.drop_call(&call_id);
            return None;
        }

        // Processing continues in stream_initialized.
        Some(call_id)
    }
}
