use uuid::Uuid;

/// Protocol identifier of every endpoint this crate understands
pub const VMESS_PROTOCOL: &str = "vmess";

/// Characters stripped from tags so they are safe as engine tags and file names
const TAG_UNSAFE_CHARS: &[char] = &[
    ' ', '：', '·', '\\', '/', ':', '*', '?', '"', '\'', '>', '<', '|',
];

/// Transport network of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Tcp,
    Kcp,
    Ws,
    Grpc,
    Http,
    /// Carried through parsing, rejected when building an outbound
    Other(String),
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Tcp => "tcp",
            Network::Kcp => "kcp",
            Network::Ws => "ws",
            Network::Grpc => "grpc",
            Network::Http => "http",
            Network::Other(raw) => raw.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "tcp" => Network::Tcp,
            "kcp" | "mkcp" => Network::Kcp,
            "ws" | "websocket" => Network::Ws,
            "grpc" => Network::Grpc,
            "h2" | "http" => Network::Http,
            _ => Network::Other(s.trim().to_string()),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport security family; exactly one is active per endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TlsFamily {
    #[default]
    None,
    Tls,
    Xtls,
    Reality,
    /// Unrecognised value, left without a security block
    Unknown(String),
}

impl TlsFamily {
    pub fn as_str(&self) -> &str {
        match self {
            TlsFamily::None => "none",
            TlsFamily::Tls => "tls",
            TlsFamily::Xtls => "xtls",
            TlsFamily::Reality => "reality",
            TlsFamily::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => TlsFamily::None,
            "tls" => TlsFamily::Tls,
            "xtls" => TlsFamily::Xtls,
            "reality" => TlsFamily::Reality,
            _ => TlsFamily::Unknown(s.trim().to_string()),
        }
    }
}

impl std::fmt::Display for TlsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters shared by the TLS families
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsParams {
    pub sni: String,
    /// Comma separated ALPN list as found in the subscription
    pub alpn: String,
    pub fingerprint: String,
    pub allow_insecure: bool,
    // reality only
    pub public_key: String,
    pub short_id: String,
    pub spider_x: String,
}

/// One candidate proxy destination decoded from a subscription line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Endpoint {
    /// Display name (`ps`)
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Raw user identifier; see [`Endpoint::user_id`]
    pub id: String,
    pub alter_id: u32,
    /// User security (`scy`), empty means auto
    pub security: String,
    pub network: Network,
    /// Header / obfuscation type (`type`)
    pub header_type: String,
    /// Host header or obfuscation parameter
    pub host: String,
    /// Path, gRPC service name or mKCP seed depending on the network
    pub path: String,
    pub tls: TlsFamily,
    pub tls_params: TlsParams,
    pub flow: String,
    pub protocol: String,
}

impl Endpoint {
    /// Derive the engine tag: prefix and display name with unsafe characters removed
    pub fn tag(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.name)
            .chars()
            .filter(|c| !TAG_UNSAFE_CHARS.contains(c))
            .collect()
    }

    /// Identifier in the form the engine expects.
    ///
    /// Values that are not 32 to 36 bytes long are mapped to a name based
    /// UUIDv5 in the nil namespace, the same mapping the engine applies to
    /// custom ids.
    pub fn user_id(&self) -> String {
        let len = self.id.len();
        if (32..=36).contains(&len) {
            self.id.clone()
        } else {
            Uuid::new_v5(&Uuid::nil(), self.id.as_bytes()).to_string()
        }
    }

    /// User security with the engine default applied
    pub fn user_security(&self) -> &str {
        if self.security.is_empty() {
            "auto"
        } else {
            &self.security
        }
    }
}
