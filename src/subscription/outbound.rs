//! Endpoint to engine outbound conversion

use tracing::warn;

use crate::error::{HelperError, Result};
use crate::models::{
    Endpoint, GrpcSettings, HeaderType, HttpRequestHeader, HttpResponseHeader, HttpSettings,
    KcpSettings, Network, OutboundDescriptor, OutboundSettings, RealitySettings, RequestHeaders,
    ResponseHeaders, StreamSettings, TcpHeader, TcpSettings, TlsFamily, TlsSettings, User, Vnext,
    WsHeaders, WsSettings,
};

const DEFAULT_GRPC_SERVICE: &str = "GunService";

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/55.0.2883.75 Safari/537.36";
const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 10_0_2 like Mac OS X) AppleWebKit/601.1 (KHTML, like Gecko) CriOS/53.0.2785.109 Mobile/14A456 Safari/601.1.46";

/// Build the outbound for `endpoint`, tagged with `prefix`
pub fn to_outbound(endpoint: &Endpoint, prefix: &str) -> Result<OutboundDescriptor> {
    let mut stream = transport_settings(endpoint)?;
    apply_security(endpoint, &mut stream);

    let flow = (!endpoint.flow.is_empty()).then(|| endpoint.flow.clone());

    Ok(OutboundDescriptor {
        tag: endpoint.tag(prefix),
        protocol: endpoint.protocol.clone(),
        settings: OutboundSettings {
            vnext: vec![Vnext {
                address: endpoint.address.clone(),
                port: endpoint.port,
                users: vec![User {
                    id: endpoint.user_id(),
                    alter_id: endpoint.alter_id,
                    security: endpoint.user_security().to_string(),
                    encryption: "none".to_string(),
                    flow,
                }],
            }],
        },
        stream_settings: stream,
    })
}

fn transport_settings(endpoint: &Endpoint) -> Result<StreamSettings> {
    let mut stream = StreamSettings {
        network: endpoint.network.as_str().to_string(),
        ..Default::default()
    };

    match &endpoint.network {
        Network::Grpc => {
            let service_name = if endpoint.path.is_empty() {
                DEFAULT_GRPC_SERVICE.to_string()
            } else {
                endpoint.path.clone()
            };
            stream.grpc_settings = Some(GrpcSettings { service_name });
        }
        Network::Ws => {
            stream.ws_settings = Some(WsSettings {
                path: endpoint.path.clone(),
                headers: (!endpoint.host.is_empty()).then(|| WsHeaders {
                    host: endpoint.host.clone(),
                }),
            });
        }
        Network::Kcp => {
            stream.kcp_settings = Some(KcpSettings {
                mtu: 1350,
                tti: 50,
                uplink_capacity: 12,
                downlink_capacity: 100,
                congestion: false,
                read_buffer_size: 2,
                write_buffer_size: 2,
                header: HeaderType {
                    kind: endpoint.header_type.clone(),
                },
                seed: endpoint.path.clone(),
            });
        }
        Network::Tcp => {
            if endpoint.header_type.eq_ignore_ascii_case("http") {
                stream.tcp_settings = Some(http_camouflage(endpoint));
            }
        }
        Network::Http => {
            stream.http_settings = Some(HttpSettings {
                path: endpoint.path.clone(),
                host: split_list(&endpoint.host),
            });
        }
        Network::Other(raw) => {
            return Err(HelperError::UnsupportedTransport(format!(
                "unexpected transport type: {}",
                raw
            )));
        }
    }

    Ok(stream)
}

fn http_camouflage(endpoint: &Endpoint) -> TcpSettings {
    let path = endpoint
        .path
        .split(',')
        .map(|p| {
            if p.starts_with('/') {
                p.to_string()
            } else {
                format!("/{}", p)
            }
        })
        .collect();

    TcpSettings {
        connection_reuse: true,
        header: TcpHeader {
            kind: "http".to_string(),
            request: HttpRequestHeader {
                version: "1.1".to_string(),
                method: "GET".to_string(),
                path,
                headers: RequestHeaders {
                    host: split_list(&endpoint.host),
                    user_agent: vec![
                        DESKTOP_USER_AGENT.to_string(),
                        MOBILE_USER_AGENT.to_string(),
                    ],
                    accept_encoding: vec!["gzip, deflate".to_string()],
                    connection: vec!["keep-alive".to_string()],
                    pragma: "no-cache".to_string(),
                },
            },
            response: HttpResponseHeader {
                version: "1.1".to_string(),
                status: "200".to_string(),
                reason: "OK".to_string(),
                headers: ResponseHeaders {
                    content_type: vec![
                        "application/octet-stream".to_string(),
                        "video/mpeg".to_string(),
                    ],
                    transfer_encoding: vec!["chunked".to_string()],
                    connection: vec!["keep-alive".to_string()],
                    pragma: "no-cache".to_string(),
                },
            },
        },
    }
}

fn apply_security(endpoint: &Endpoint, stream: &mut StreamSettings) {
    let params = &endpoint.tls_params;
    let server_name = if params.sni.is_empty() {
        endpoint.host.clone()
    } else {
        params.sni.clone()
    };

    match &endpoint.tls {
        TlsFamily::None => {}
        TlsFamily::Tls => {
            stream.security = Some("tls".to_string());
            stream.tls_settings = Some(TlsSettings {
                server_name,
                allow_insecure: params.allow_insecure,
                alpn: split_list(&params.alpn),
                fingerprint: params.fingerprint.clone(),
            });
        }
        TlsFamily::Xtls => {
            stream.security = Some("xtls".to_string());
            stream.xtls_settings = Some(TlsSettings {
                server_name,
                allow_insecure: params.allow_insecure,
                alpn: split_list(&params.alpn),
                fingerprint: String::new(),
            });
        }
        TlsFamily::Reality => {
            stream.security = Some("reality".to_string());
            stream.reality_settings = Some(RealitySettings {
                show: false,
                fingerprint: params.fingerprint.clone(),
                server_name: params.sni.clone(),
                public_key: params.public_key.clone(),
                short_id: params.short_id.clone(),
                spider_x: params.spider_x.clone(),
            });
        }
        TlsFamily::Unknown(raw) => {
            warn!(
                "endpoint '{}' has unknown tls value '{}', no security block generated",
                endpoint.name, raw
            );
        }
    }
}

/// Split a comma separated list, trimming items and dropping empty ones
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
