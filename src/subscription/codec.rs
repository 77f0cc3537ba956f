//! `vmess://` URI decoding
//!
//! Two encodings are accepted: a base64 JSON object, and the legacy
//! `vmess://base64(security:id@host:port)?query` form.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::decode_base64_text;
use crate::error::{HelperError, Result};
use crate::models::{Endpoint, Network, TlsFamily, TlsParams, VMESS_PROTOCOL};

pub const VMESS_SCHEME: &str = "vmess://";

/// Parse one subscription line into an endpoint
pub fn parse(uri: &str) -> Result<Endpoint> {
    let uri = uri.trim();
    let payload = uri
        .strip_prefix(VMESS_SCHEME)
        .ok_or_else(|| HelperError::Parse(format!("unsupported scheme: {}", preview(uri))))?;

    let json_object = decode_base64_text(payload)
        .and_then(|text| match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Some(Value::Object(map)),
            _ => None,
        });

    let mut endpoint = match json_object {
        Some(object) => parse_json(object)?,
        None => parse_legacy(payload)?,
    };

    // Producers regularly put the path into the host field
    if endpoint.host.starts_with('/') && endpoint.path.is_empty() {
        endpoint.path = std::mem::take(&mut endpoint.host);
    }

    Ok(endpoint)
}

/// JSON share format
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VmessJson {
    #[serde(deserialize_with = "loose_string")]
    ps: String,
    #[serde(deserialize_with = "loose_string")]
    add: String,
    #[serde(deserialize_with = "loose_port")]
    port: u16,
    #[serde(deserialize_with = "loose_string")]
    id: String,
    #[serde(deserialize_with = "loose_alter_id")]
    aid: u32,
    #[serde(deserialize_with = "loose_string")]
    scy: String,
    #[serde(deserialize_with = "loose_string")]
    net: String,
    #[serde(rename = "type", deserialize_with = "loose_string")]
    kind: String,
    #[serde(deserialize_with = "loose_string")]
    host: String,
    #[serde(deserialize_with = "loose_string")]
    sni: String,
    #[serde(deserialize_with = "loose_string")]
    path: String,
    #[serde(deserialize_with = "loose_string")]
    tls: String,
    #[serde(alias = "fingerprint", deserialize_with = "loose_string")]
    fp: String,
    #[serde(deserialize_with = "loose_string")]
    pbk: String,
    #[serde(deserialize_with = "loose_string")]
    sid: String,
    #[serde(deserialize_with = "loose_string")]
    spx: String,
    #[serde(deserialize_with = "loose_string")]
    flow: String,
    #[serde(deserialize_with = "loose_string")]
    alpn: String,
    #[serde(rename = "allowInsecure", deserialize_with = "loose_bool")]
    allow_insecure: bool,
}

fn parse_json(object: Value) -> Result<Endpoint> {
    let info: VmessJson = serde_json::from_value(object)
        .map_err(|e| HelperError::Parse(format!("invalid vmess json: {}", e)))?;

    Ok(Endpoint {
        name: info.ps,
        address: info.add,
        port: info.port,
        id: info.id,
        alter_id: info.aid,
        security: info.scy,
        network: Network::parse(&info.net),
        header_type: info.kind,
        host: info.host,
        path: info.path,
        tls: TlsFamily::parse(&info.tls),
        tls_params: TlsParams {
            sni: info.sni,
            alpn: info.alpn,
            fingerprint: info.fp,
            allow_insecure: info.allow_insecure,
            public_key: info.pbk,
            short_id: info.sid,
            spider_x: info.spx,
        },
        flow: info.flow,
        protocol: VMESS_PROTOCOL.to_string(),
    })
}

fn parse_legacy(payload: &str) -> Result<Endpoint> {
    let (encoded, query) = payload.split_once('?').unwrap_or((payload, ""));
    let query = query.split('#').next().unwrap_or_default();

    let address = decode_base64_text(encoded)
        .ok_or_else(|| HelperError::Parse("unrecognized vmess address".into()))?;
    let (default_security, id, host, port) = split_legacy_address(address.trim())?;

    let params: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let get = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|key| {
                params
                    .iter()
                    .find(|(k, v)| k == key && !v.is_empty())
                    .map(|(_, v)| v.clone())
            })
            .unwrap_or_default()
    };

    let obfs = get(&["obfs"]);
    let mut obfs_param = get(&["obfsParam"]);
    let mut path = get(&["path"]);
    let network = Network::parse(&obfs);

    if network == Network::Kcp {
        // seed travels as {"seed": "..."} inside obfsParam
        path = serde_json::from_str::<Value>(&obfs_param)
            .ok()
            .and_then(|v| v.get("seed").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        obfs_param.clear();
    }

    let alter_id = match get(&["alterId", "aid"]) {
        aid if aid.is_empty() => 0,
        aid => aid
            .trim()
            .parse::<u32>()
            .map_err(|_| HelperError::Parse(format!("unrecognized alter id: {}", aid)))?,
    };

    let mut security = get(&["scy", "security"]);
    if security.is_empty() {
        security = default_security;
    }

    let tls = if get(&["tls"]) == "1" {
        TlsFamily::Tls
    } else {
        TlsFamily::None
    };

    Ok(Endpoint {
        name: get(&["remarks", "remark"]),
        address: host,
        port,
        id,
        alter_id,
        security,
        network,
        header_type: String::new(),
        host: obfs_param,
        path,
        tls,
        tls_params: TlsParams {
            sni: get(&["sni"]),
            ..Default::default()
        },
        flow: String::new(),
        protocol: VMESS_PROTOCOL.to_string(),
    })
}

/// Split `security:id@host:port`
fn split_legacy_address(address: &str) -> Result<(String, String, String, u16)> {
    let unrecognized =
        || HelperError::Parse(format!("unrecognized vmess address: {}", preview(address)));

    let (credentials, host_port) = address.rsplit_once('@').ok_or_else(unrecognized)?;
    let (security, id) = credentials.rsplit_once(':').ok_or_else(unrecognized)?;
    let (host, port) = host_port.rsplit_once(':').ok_or_else(unrecognized)?;
    if id.is_empty() || host.is_empty() {
        return Err(unrecognized());
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| HelperError::Parse(format!("unrecognized port: {}", port)))?;

    Ok((security.to_string(), id.to_string(), host.to_string(), port))
}

fn preview(s: &str) -> String {
    s.chars().take(48).collect()
}

fn loose_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {}",
            other
        ))),
    }
}

fn loose_number<'de, D>(deserializer: D, field: &str) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let invalid = |v: &dyn std::fmt::Display| -> D::Error {
        serde::de::Error::custom(format!("unrecognized {}: {}", field, v))
    };
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => n.as_u64().ok_or_else(|| invalid(&n)),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s.trim().parse::<u64>().map_err(|_| invalid(&s)),
        other => Err(invalid(&other)),
    }
}

fn loose_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let n = loose_number(deserializer, "port")?;
    u16::try_from(n).map_err(|_| serde::de::Error::custom(format!("unrecognized port: {}", n)))
}

fn loose_alter_id<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let n = loose_number(deserializer, "alter id")?;
    u32::try_from(n)
        .map_err(|_| serde::de::Error::custom(format!("unrecognized alter id: {}", n)))
}

fn loose_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "t" | "true"
        )),
        Value::Number(n) => Ok(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE, Engine};
    use serde_json::json;

    fn json_uri(value: serde_json::Value) -> String {
        format!("vmess://{}", STANDARD.encode(value.to_string()))
    }

    fn legacy_uri(address: &str, query: &str) -> String {
        format!("vmess://{}?{}", STANDARD.encode(address), query)
    }

    #[test]
    fn test_parse_json_form() {
        let uri = json_uri(json!({
            "v": "2",
            "ps": "HK 01",
            "add": "hk.example.com",
            "port": "443",
            "id": "b831381d-6324-4d53-ad4f-8cda48b30811",
            "aid": 0,
            "scy": "auto",
            "net": "ws",
            "type": "none",
            "host": "cdn.example.com",
            "path": "/ray",
            "tls": "tls",
            "sni": "sni.example.com",
            "alpn": "h2, http/1.1",
            "fp": "chrome",
            "allowInsecure": "true"
        }));

        let endpoint = parse(&uri).unwrap();

        assert_eq!(endpoint.name, "HK 01");
        assert_eq!(endpoint.address, "hk.example.com");
        assert_eq!(endpoint.port, 443);
        assert_eq!(endpoint.network, Network::Ws);
        assert_eq!(endpoint.tls, TlsFamily::Tls);
        assert_eq!(endpoint.tls_params.sni, "sni.example.com");
        assert_eq!(endpoint.tls_params.fingerprint, "chrome");
        assert!(endpoint.tls_params.allow_insecure);
        assert_eq!(endpoint.protocol, "vmess");
    }

    #[test]
    fn test_parse_json_url_safe_alphabet_and_bool() {
        let value = json!({
            "ps": "???", "add": "a.example", "port": 8443, "id": "x",
            "net": "grpc", "path": "svc", "allowInsecure": false
        });
        let uri = format!("vmess://{}", URL_SAFE.encode(value.to_string()));

        let endpoint = parse(&uri).unwrap();

        assert_eq!(endpoint.name, "???");
        assert_eq!(endpoint.port, 8443);
        assert_eq!(endpoint.network, Network::Grpc);
        assert!(!endpoint.tls_params.allow_insecure);
    }

    #[test]
    fn test_parse_json_reality_fields() {
        let uri = json_uri(json!({
            "ps": "r", "add": "r.example", "port": 443, "id": "x", "net": "tcp",
            "tls": "reality", "sni": "www.microsoft.com", "fingerprint": "firefox",
            "pbk": "PUBKEY", "sid": "abcd", "spx": "/", "flow": "xtls-rprx-vision"
        }));

        let endpoint = parse(&uri).unwrap();

        assert_eq!(endpoint.tls, TlsFamily::Reality);
        assert_eq!(endpoint.tls_params.fingerprint, "firefox");
        assert_eq!(endpoint.tls_params.public_key, "PUBKEY");
        assert_eq!(endpoint.tls_params.short_id, "abcd");
        assert_eq!(endpoint.tls_params.spider_x, "/");
        assert_eq!(endpoint.flow, "xtls-rprx-vision");
    }

    #[test]
    fn test_parse_json_rejects_non_numeric_port_and_aid() {
        let bad_port = json_uri(json!({"ps": "a", "add": "h", "port": "https", "id": "x"}));
        assert!(matches!(parse(&bad_port), Err(HelperError::Parse(_))));

        let bad_aid = json_uri(json!({"ps": "a", "add": "h", "port": 1, "id": "x", "aid": "zero"}));
        assert!(matches!(parse(&bad_aid), Err(HelperError::Parse(_))));
    }

    #[test]
    fn test_parse_legacy_form() {
        let uri = legacy_uri(
            "auto:b831381d-6324-4d53-ad4f-8cda48b30811@1.2.3.4:443",
            "remarks=NodeA&obfs=ws&path=/v&tls=1",
        );

        let endpoint = parse(&uri).unwrap();

        assert_eq!(endpoint.name, "NodeA");
        assert_eq!(endpoint.network, Network::Ws);
        assert_eq!(endpoint.tls, TlsFamily::Tls);
        assert_eq!(endpoint.address, "1.2.3.4");
        assert_eq!(endpoint.port, 443);
        assert_eq!(endpoint.id, "b831381d-6324-4d53-ad4f-8cda48b30811");
        assert_eq!(endpoint.security, "auto");
        assert_eq!(endpoint.path, "/v");
    }

    #[test]
    fn test_parse_legacy_query_aliases() {
        let uri = legacy_uri(
            "none:id@host.example:80",
            "remark=Alias&obfs=websocket&aid=4&security=aes-128-gcm&obfsParam=cdn.example&sni=s.example",
        );

        let endpoint = parse(&uri).unwrap();

        assert_eq!(endpoint.name, "Alias");
        assert_eq!(endpoint.network, Network::Ws);
        assert_eq!(endpoint.alter_id, 4);
        assert_eq!(endpoint.security, "aes-128-gcm");
        assert_eq!(endpoint.host, "cdn.example");
        assert_eq!(endpoint.tls_params.sni, "s.example");
        assert_eq!(endpoint.tls, TlsFamily::None);
    }

    #[test]
    fn test_parse_legacy_kcp_seed() {
        let uri = legacy_uri(
            "auto:id@host.example:9000",
            "remarks=K&obfs=mkcp&obfsParam=%7B%22seed%22%3A%22s33d%22%7D",
        );

        let endpoint = parse(&uri).unwrap();

        assert_eq!(endpoint.network, Network::Kcp);
        assert_eq!(endpoint.path, "s33d");
        assert!(endpoint.host.is_empty());
    }

    #[test]
    fn test_parse_legacy_errors() {
        let bad_port = legacy_uri("auto:id@host.example:https", "remarks=x");
        assert!(matches!(parse(&bad_port), Err(HelperError::Parse(_))));

        let bad_aid = legacy_uri("auto:id@host.example:443", "aid=four");
        assert!(matches!(parse(&bad_aid), Err(HelperError::Parse(_))));

        let no_structure = legacy_uri("just some text", "remarks=x");
        assert!(matches!(parse(&no_structure), Err(HelperError::Parse(_))));

        assert!(matches!(
            parse("vmess://%%%not-base64%%%"),
            Err(HelperError::Parse(_))
        ));
        assert!(matches!(
            parse("ss://YWVzOnBhc3M=@h:1"),
            Err(HelperError::Parse(_))
        ));
    }

    #[test]
    fn test_host_that_looks_like_path_becomes_path() {
        let uri = json_uri(json!({
            "ps": "p", "add": "h", "port": 80, "id": "x", "net": "ws", "host": "/ws-path"
        }));

        let endpoint = parse(&uri).unwrap();

        assert_eq!(endpoint.path, "/ws-path");
        assert!(endpoint.host.is_empty());
    }

    #[test]
    fn test_explicit_path_is_not_overwritten() {
        let uri = legacy_uri("auto:id@h:80", "obfs=ws&obfsParam=/odd&path=/real");

        let endpoint = parse(&uri).unwrap();

        assert_eq!(endpoint.path, "/real");
        assert_eq!(endpoint.host, "/odd");
    }
}
