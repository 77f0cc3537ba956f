//! Engine-facing outbound objects
//!
//! Field names follow the engine's JSON configuration schema.

use serde::Serialize;

/// One outbound entry, generated from an [`Endpoint`](super::Endpoint)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundDescriptor {
    pub tag: String,
    pub protocol: String,
    pub settings: OutboundSettings,
    pub stream_settings: StreamSettings,
}

/// File body wrapping a set of outbounds
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFile<'a> {
    pub outbounds: &'a [OutboundDescriptor],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundSettings {
    pub vnext: Vec<Vnext>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vnext {
    pub address: String,
    pub port: u16,
    pub users: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub alter_id: u32,
    pub security: String,
    pub encryption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xtls_settings: Option<TlsSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealitySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_settings: Option<TcpSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kcp_settings: Option<KcpSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_settings: Option<WsSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_settings: Option<HttpSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grpc_settings: Option<GrpcSettings>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    pub allow_insecure: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    pub show: bool,
    pub fingerprint: String,
    pub server_name: String,
    pub public_key: String,
    pub short_id: String,
    pub spider_x: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KcpSettings {
    pub mtu: u32,
    pub tti: u32,
    pub uplink_capacity: u32,
    pub downlink_capacity: u32,
    pub congestion: bool,
    pub read_buffer_size: u32,
    pub write_buffer_size: u32,
    pub header: HeaderType,
    pub seed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderType {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsSettings {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<WsHeaders>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsHeaders {
    #[serde(rename = "Host")]
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpSettings {
    pub path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSettings {
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpSettings {
    pub connection_reuse: bool,
    pub header: TcpHeader,
}

/// HTTP camouflage for plain tcp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TcpHeader {
    #[serde(rename = "type")]
    pub kind: String,
    pub request: HttpRequestHeader,
    pub response: HttpResponseHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpRequestHeader {
    pub version: String,
    pub method: String,
    pub path: Vec<String>,
    pub headers: RequestHeaders,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestHeaders {
    #[serde(rename = "Host")]
    pub host: Vec<String>,
    #[serde(rename = "User-Agent")]
    pub user_agent: Vec<String>,
    #[serde(rename = "Accept-Encoding")]
    pub accept_encoding: Vec<String>,
    #[serde(rename = "Connection")]
    pub connection: Vec<String>,
    #[serde(rename = "Pragma")]
    pub pragma: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpResponseHeader {
    pub version: String,
    pub status: String,
    pub reason: String,
    pub headers: ResponseHeaders,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseHeaders {
    #[serde(rename = "Content-Type")]
    pub content_type: Vec<String>,
    #[serde(rename = "Transfer-Encoding")]
    pub transfer_encoding: Vec<String>,
    #[serde(rename = "Connection")]
    pub connection: Vec<String>,
    #[serde(rename = "Pragma")]
    pub pragma: String,
}
