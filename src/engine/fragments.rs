//! Generated configuration fragments

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::files::{remove_by_prefix, write_file, CleanupReport};
use super::{
    to_json_pretty, API_FILE, API_TAG, BALANCER_TAG, BASE_OUTBOUND_FILE, BLOCKED_TAG, DIRECT_TAG,
    DNS_FILE, HTTP_INBOUND_TAG, INBOUND_FILE, LOG_FILE, POLICY_FILE, PROXY_FILE_PREFIX,
    PROXY_TAG_PREFIX, ROUTE_FILE, SOCKS_INBOUND_TAG, TAIL_FILE_SUFFIX, TEST_FILE_PREFIX,
    TEST_INBOUND_TAG, TEST_TAG_PREFIX,
};
use crate::config::XrayConfig;
use crate::error::Result;
use crate::models::{
    Balancer, Endpoint, OutboundFile, Routing, RoutingDocument, RoutingRule, RuleTarget,
};
use crate::subscription::to_outbound;

const DIRECT_GEOSITES: &[&str] = &[
    "geosite:apple-cn",
    "geosite:google-cn",
    "geosite:cn",
    "geosite:geolocation-cn",
];

const DIRECT_IPS: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "114.114.114.114/32",
    "fc00::/7",
    "fe80::/10",
    "geoip:private",
    "geoip:cn",
];

const AD_GEOSITES: &[&str] = &["geosite:category-ads", "geosite:category-ads-all"];

/// Writes the engine configuration directory
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    config: XrayConfig,
    dir: PathBuf,
}

impl ConfigWriter {
    pub fn new(config: &XrayConfig) -> Self {
        Self {
            dir: config.config_dir(),
            config: config.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn route_path(&self) -> PathBuf {
        self.dir.join(ROUTE_FILE)
    }

    /// Write the seven static fragments, creating the directory if needed
    pub async fn write_base_fragments(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        self.write_json(API_FILE, &self.api()).await?;
        self.write_log().await?;
        self.write_json(DNS_FILE, &self.dns()).await?;
        self.write_json(POLICY_FILE, &self.policy()).await?;
        self.write_json(INBOUND_FILE, &self.inbounds()).await?;
        self.write_json(BASE_OUTBOUND_FILE, &self.base_outbounds()).await?;
        self.write_routing(&self.default_routing()).await?;

        info!("engine configuration written to {}", self.dir.display());
        Ok(())
    }

    pub async fn write_routing(&self, document: &RoutingDocument) -> Result<()> {
        write_file(self.route_path(), &to_json_pretty(document)?).await
    }

    /// Probe outbound for `endpoint`, always generated
    pub async fn write_test_outbound(&self, endpoint: &Endpoint) -> Result<PathBuf> {
        self.write_outbound(endpoint, TEST_TAG_PREFIX, TEST_FILE_PREFIX)
            .await
    }

    /// Balancer member outbound for a selected `endpoint`
    pub async fn write_proxy_outbound(&self, endpoint: &Endpoint) -> Result<PathBuf> {
        self.write_outbound(endpoint, PROXY_TAG_PREFIX, PROXY_FILE_PREFIX)
            .await
    }

    pub async fn clear_test_outbounds(&self) -> Result<CleanupReport> {
        remove_by_prefix(&self.dir, TEST_FILE_PREFIX).await
    }

    pub async fn clear_proxy_outbounds(&self) -> Result<CleanupReport> {
        remove_by_prefix(&self.dir, PROXY_FILE_PREFIX).await
    }

    async fn write_outbound(
        &self,
        endpoint: &Endpoint,
        tag_prefix: &str,
        file_prefix: &str,
    ) -> Result<PathBuf> {
        let outbound = to_outbound(endpoint, tag_prefix)?;
        let path = self.dir.join(format!(
            "{}{}{}",
            file_prefix, outbound.tag, TAIL_FILE_SUFFIX
        ));

        let body = OutboundFile {
            outbounds: std::slice::from_ref(&outbound),
        };
        write_file(&path, &to_json_pretty(&body)?).await?;

        Ok(path)
    }

    async fn write_json(&self, name: &str, value: &Value) -> Result<()> {
        write_file(self.dir.join(name), &to_json_pretty(value)?).await
    }

    async fn write_log(&self) -> Result<()> {
        let log_dir = Path::new(&self.config.log_dir);
        tokio::fs::create_dir_all(log_dir).await?;
        debug!("engine logs go to {}", log_dir.display());

        let log = json!({
            "log": {
                "access": log_dir.join("access.log").to_string_lossy(),
                "error": log_dir.join("error.log").to_string_lossy(),
                "loglevel": "debug",
                "dnsLog": true
            }
        });
        self.write_json(LOG_FILE, &log).await
    }

    fn api(&self) -> Value {
        json!({
            "api": {
                "tag": API_TAG,
                "services": ["HandlerService", "LoggerService", "StatsService"]
            }
        })
    }

    fn dns(&self) -> Value {
        json!({
            "dns": {
                "hosts": {
                    "dns.google": ["8.8.8.8", "8.8.4.4"]
                },
                "servers": [
                    "8.8.8.8",
                    "8.8.4.4",
                    {
                        "address": "114.114.114.114",
                        "domains": ["geosite:cn"],
                        "expectIPs": ["geoip:cn"],
                        "skipFallback": true
                    },
                    "localhost"
                ],
                "queryStrategy": "UseIP",
                "disableCache": false,
                "disableFallback": false,
                "disableFallbackIfMatch": false,
                "tag": "dns_tag"
            }
        })
    }

    fn policy(&self) -> Value {
        json!({
            "policy": {
                "levels": {
                    "0": {
                        "handshake": 4,
                        "connIdle": 300,
                        "uplinkOnly": 2,
                        "downlinkOnly": 5,
                        "statsUserUplink": false,
                        "statsUserDownlink": false
                    }
                },
                "system": {
                    "statsInboundUplink": false,
                    "statsInboundDownlink": false,
                    "statsOutboundUplink": false,
                    "statsOutboundDownlink": false
                }
            }
        })
    }

    fn inbounds(&self) -> Value {
        let cfg = &self.config;
        let proxy_inbound = |listen: &str, port: u16, protocol: &str, tag: &str| {
            json!({
                "listen": listen,
                "port": port,
                "protocol": protocol,
                "settings": {},
                "streamSettings": {},
                "tag": tag,
                "sniffing": {
                    "enabled": true,
                    "destOverride": ["http", "tls"]
                },
                "allocate": {
                    "strategy": "always"
                }
            })
        };

        json!({
            "inbounds": [
                proxy_inbound(&cfg.address, cfg.socks_port, "socks", SOCKS_INBOUND_TAG),
                proxy_inbound(&cfg.address, cfg.http_port, "http", HTTP_INBOUND_TAG),
                {
                    "listen": "127.0.0.1",
                    "port": cfg.api_port,
                    "protocol": "dokodemo-door",
                    "settings": {
                        "address": "127.0.0.1"
                    },
                    "tag": API_TAG
                },
                proxy_inbound("127.0.0.1", cfg.test_port, "http", TEST_INBOUND_TAG)
            ]
        })
    }

    fn base_outbounds(&self) -> Value {
        json!({
            "outbounds": [
                {"protocol": "freedom", "settings": {}, "tag": DIRECT_TAG},
                {"protocol": "blackhole", "settings": {}, "tag": BLOCKED_TAG},
                {"protocol": "freedom", "settings": {}, "tag": API_TAG}
            ]
        })
    }

    /// Routing document written on every (re)configuration.
    ///
    /// Whitelisted domains and domestic destinations go direct, blacklisted
    /// and foreign ones through the balancer, ads are dropped.
    pub fn default_routing(&self) -> RoutingDocument {
        let user_inbounds = || {
            Some(vec![
                SOCKS_INBOUND_TAG.to_string(),
                HTTP_INBOUND_TAG.to_string(),
            ])
        };
        let user_rule = |domain: Vec<String>, ip: Vec<String>, target: RuleTarget| RoutingRule {
            domain: Some(domain),
            ip: Some(ip),
            network: Some("tcp".to_string()),
            source: Some(Vec::new()),
            user: Some(Vec::new()),
            inbound_tag: user_inbounds(),
            protocol: Some(Vec::new()),
            attrs: Some(json!({})),
            ..RoutingRule::field(target)
        };

        let whitelist = with_builtin(&self.config.domain_whitelist, DIRECT_GEOSITES);
        let blacklist = with_builtin(&self.config.domain_blacklist, &["geosite:geolocation-!cn"]);

        let api_rule = RoutingRule {
            inbound_tag: Some(vec![API_TAG.to_string()]),
            ..RoutingRule::field(RuleTarget::outbound(API_TAG))
        };
        let ads_rule = RoutingRule {
            domain: Some(strings(AD_GEOSITES)),
            ip: Some(Vec::new()),
            network: Some("tcp,udp".to_string()),
            source: Some(Vec::new()),
            user: Some(Vec::new()),
            inbound_tag: Some(Vec::new()),
            protocol: Some(Vec::new()),
            attrs: Some(json!({})),
            ..RoutingRule::field(RuleTarget::outbound(BLOCKED_TAG))
        };

        RoutingDocument {
            routing: Routing {
                domain_strategy: Some("AsIs".to_string()),
                domain_matcher: Some("hybrid".to_string()),
                rules: vec![
                    user_rule(whitelist, Vec::new(), RuleTarget::outbound(DIRECT_TAG)),
                    user_rule(Vec::new(), strings(DIRECT_IPS), RuleTarget::outbound(DIRECT_TAG)),
                    user_rule(blacklist, Vec::new(), RuleTarget::balancer(BALANCER_TAG)),
                    user_rule(
                        Vec::new(),
                        vec!["geoip:!cn".to_string()],
                        RuleTarget::balancer(BALANCER_TAG),
                    ),
                    api_rule,
                    ads_rule,
                ],
                balancers: vec![Balancer {
                    tag: BALANCER_TAG.to_string(),
                    selector: vec!["proxy".to_string()],
                    strategy: None,
                    extra: Map::new(),
                }],
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// User entries first, then the builtin ones; blank user entries are dropped
fn with_builtin(user: &[String], builtin: &[&str]) -> Vec<String> {
    user.iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .chain(builtin.iter().map(|s| s.to_string()))
        .collect()
}
