//! Typed model of the engine's routing document

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HelperError, Result};

/// Contents of the routing file: `{"routing": {...}}`
///
/// Keys the model does not name are carried in `extra` and written back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDocument {
    pub routing: Routing,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_matcher: Option<String>,
    pub rules: Vec<RoutingRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub balancers: Vec<Balancer>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where a matching rule sends traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    Outbound { outbound_tag: String },
    Balancer { balancer_tag: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleFields", into = "RuleFields")]
pub struct RoutingRule {
    pub kind: Option<String>,
    pub domain: Option<Vec<String>>,
    pub ip: Option<Vec<String>>,
    pub port: Option<Value>,
    pub network: Option<String>,
    pub source: Option<Vec<String>>,
    pub user: Option<Vec<String>>,
    pub inbound_tag: Option<Vec<String>>,
    pub protocol: Option<Vec<String>>,
    pub attrs: Option<Value>,
    pub target: RuleTarget,
    /// Matchers and settings not modelled above
    pub extra: Map<String, Value>,
}

/// Wire form of a rule: both targets optional, everything else kept in `extra`
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleFields {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inbound_tag: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protocol: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attrs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outbound_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    balancer_tag: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RuleFields> for RoutingRule {
    type Error = String;

    fn try_from(fields: RuleFields) -> std::result::Result<Self, Self::Error> {
        let mut extra = fields.extra;
        let target = match (fields.outbound_tag, fields.balancer_tag) {
            (Some(outbound_tag), balancer_tag) => {
                // the engine prefers the outbound; keep the balancer as written
                if let Some(tag) = balancer_tag {
                    extra.insert("balancerTag".to_string(), Value::String(tag));
                }
                RuleTarget::Outbound { outbound_tag }
            }
            (None, Some(balancer_tag)) => RuleTarget::Balancer { balancer_tag },
            (None, None) => {
                return Err("routing rule has neither outboundTag nor balancerTag".to_string())
            }
        };

        Ok(Self {
            kind: fields.kind,
            domain: fields.domain,
            ip: fields.ip,
            port: fields.port,
            network: fields.network,
            source: fields.source,
            user: fields.user,
            inbound_tag: fields.inbound_tag,
            protocol: fields.protocol,
            attrs: fields.attrs,
            target,
            extra,
        })
    }
}

impl From<RoutingRule> for RuleFields {
    fn from(rule: RoutingRule) -> Self {
        let (outbound_tag, balancer_tag) = match rule.target {
            RuleTarget::Outbound { outbound_tag } => (Some(outbound_tag), None),
            RuleTarget::Balancer { balancer_tag } => (None, Some(balancer_tag)),
        };

        Self {
            kind: rule.kind,
            domain: rule.domain,
            ip: rule.ip,
            port: rule.port,
            network: rule.network,
            source: rule.source,
            user: rule.user,
            inbound_tag: rule.inbound_tag,
            protocol: rule.protocol,
            attrs: rule.attrs,
            outbound_tag,
            balancer_tag,
            extra: rule.extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balancer {
    pub tag: String,
    pub selector: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoutingRule {
    /// Field rule with every matcher empty
    pub fn field(target: RuleTarget) -> Self {
        Self {
            kind: Some("field".to_string()),
            domain: None,
            ip: None,
            port: None,
            network: None,
            source: None,
            user: None,
            inbound_tag: None,
            protocol: None,
            attrs: None,
            target,
            extra: Map::new(),
        }
    }

    pub fn outbound_tag(&self) -> Option<&str> {
        match &self.target {
            RuleTarget::Outbound { outbound_tag } => Some(outbound_tag),
            RuleTarget::Balancer { .. } => None,
        }
    }

    /// Whether this rule targets an outbound whose tag starts with `prefix`
    pub fn targets_prefix(&self, prefix: &str) -> bool {
        self.outbound_tag()
            .map(|tag| tag.starts_with(prefix))
            .unwrap_or(false)
    }
}

impl RuleTarget {
    pub fn outbound(tag: impl Into<String>) -> Self {
        RuleTarget::Outbound {
            outbound_tag: tag.into(),
        }
    }

    pub fn balancer(tag: impl Into<String>) -> Self {
        RuleTarget::Balancer {
            balancer_tag: tag.into(),
        }
    }
}

impl RoutingDocument {
    /// Parse a routing file; any structural problem is a configuration error
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| HelperError::Config(format!("malformed routing document: {}", e)))
    }

    /// Drop every rule targeting an outbound tagged with `prefix`
    pub fn remove_rules_with_prefix(&mut self, prefix: &str) -> usize {
        let before = self.routing.rules.len();
        self.routing.rules.retain(|rule| !rule.targets_prefix(prefix));
        before - self.routing.rules.len()
    }

    pub fn push_rules(&mut self, rules: impl IntoIterator<Item = RoutingRule>) {
        self.routing.rules.extend(rules);
    }
}
