//! Calling configuration — account URIs, server capability flags and the
//! per-media-type port ranges handed to the backend when streams are created.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::EncryptionPolicy;

/// Inclusive UDP port range for local candidate gathering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        PortRange {
            min: 1024,
            max: 65535,
        }
    }
}

/// Port ranges per media type. A missing entry falls back to `media`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// General range used when no type-specific one is set.
    pub media: PortRange,
    pub audio: Option<PortRange>,
    pub video: Option<PortRange>,
    pub filetransfer: Option<PortRange>,
    pub appsharing: Option<PortRange>,
}

/// Per-signed-in-account calling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Our own SIP URI, e.g. `sip:jane@example.com`.
    pub self_uri: String,
    /// Contact header value, e.g. `<sip:jane@example.com;transport=tls>`.
    pub contact: String,
    /// SIP domain used to build `user=phone` URIs.
    pub sip_domain: String,
    /// Unified-communications line URI; when set, INVITEs carry
    /// P-Preferred-Identity.
    pub uc_line_uri: Option<String>,
    /// URI of the server's audio test bot, if provisioned.
    pub test_call_bot_uri: Option<String>,
    /// MRAS service URI for media relay credentials.
    pub mras_uri: Option<String>,
    /// Server is OCS 2007 or newer.
    pub ocs2007: bool,
    /// Server is Lync 2013 or newer.
    pub lync2013: bool,
    /// The session is signed in from outside the corporate network.
    pub remote_user: bool,
    /// A/V encryption default advertised by the server during provisioning.
    pub server_av_encryption_policy: EncryptionPolicy,
    pub ports: PortConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        MediaConfig {
            self_uri: String::new(),
            contact: String::new(),
            sip_domain: String::new(),
            uc_line_uri: None,
            test_call_bot_uri: None,
            mras_uri: None,
            ocs2007: true,
            lync2013: false,
            remote_user: false,
            server_av_encryption_policy: EncryptionPolicy::Required,
            ports: PortConfig::default(),
        }
    }
}

impl MediaConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// RTCP canonical name: the contact with its angle brackets stripped.
    pub fn cname(&self) -> String {
        self.contact
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_roundtrip() {
        let mut config = MediaConfig::default();
        config.self_uri = "sip:jane@example.com".into();
        config.ports.audio = Some(PortRange {
            min: 5350,
            max: 5389,
        });
        config.server_av_encryption_policy = EncryptionPolicy::Optional;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: MediaConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.self_uri, "sip:jane@example.com");
        assert_eq!(parsed.ports.audio, Some(PortRange { min: 5350, max: 5389 }));
        assert_eq!(
            parsed.server_av_encryption_policy,
            EncryptionPolicy::Optional
        );
        assert_eq!(parsed.ports.video, None);
    }

    #[test]
    fn test_cname_strips_brackets() {
        let config = MediaConfig {
            contact: "<sip:jane@example.com;transport=tls>".into(),
            ..MediaConfig::default()
        };
        assert_eq!(config.cname(), "sip:jane@example.com;transport=tls");
    }
}
