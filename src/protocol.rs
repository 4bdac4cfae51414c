use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use strum_macros::{Display, EnumString};

/// Application-layer protocols the library can report.
///
/// `Unknown` means "not classified yet" and is what every classification
/// path returns when it cannot decide.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
pub enum Protocol {
    #[default]
    #[strum(serialize = "Unknown")]
    Unknown,
    #[strum(serialize = "HTTP")]
    Http,
    #[strum(serialize = "DNS")]
    Dns,
    #[strum(serialize = "SSH")]
    Ssh,
    #[strum(serialize = "RPC")]
    Rpc,
    #[strum(serialize = "SMTP")]
    Smtp,
    #[strum(serialize = "RDP")]
    Rdp,
    #[strum(serialize = "SMB")]
    Smb,
    #[strum(serialize = "ICMP")]
    Icmp,
    #[strum(serialize = "FTP")]
    Ftp,
    #[strum(serialize = "SSL")]
    Ssl,
    #[strum(serialize = "NetBIOS")]
    NetBios,
    #[strum(serialize = "JABBER")]
    Jabber,
    #[strum(serialize = "MQTT")]
    Mqtt,
    #[strum(serialize = "BitTorrent")]
    BitTorrent,
}

impl Protocol {
    pub fn is_unknown(&self) -> bool {
        *self == Protocol::Unknown
    }
}

/// Name of the subsystem that produced a classification.
///
/// The empty name is reserved for "no classification made".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ClassificationSource(Cow<'static, str>);

impl ClassificationSource {
    pub const NONE: ClassificationSource = ClassificationSource(Cow::Borrowed(""));

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ClassificationSource {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// A protocol together with the source that detected it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub protocol: Protocol,
    pub source: ClassificationSource,
}

impl ClassificationResult {
    pub fn new(protocol: Protocol, source: ClassificationSource) -> Self {
        Self { protocol, source }
    }

    /// The `{Unknown, NoSource}` result.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.protocol.is_unknown()
    }
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Detected protocol {} from source {}",
            self.protocol, self.source
        )
    }
}
