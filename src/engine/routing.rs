//! Keeps the probe routing rules in line with the known endpoints

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use super::files::read_file;
use super::fragments::ConfigWriter;
use super::{TEST_INBOUND_TAG, TEST_TAG_PREFIX};
use crate::error::Result;
use crate::models::{Endpoint, RoutingDocument, RoutingRule, RuleTarget};

/// Rewrites the routing file so it holds exactly one probe rule per endpoint
#[derive(Debug, Clone)]
pub struct RoutingRuleSynchronizer {
    writer: ConfigWriter,
}

impl RoutingRuleSynchronizer {
    pub fn new(writer: ConfigWriter) -> Self {
        Self { writer }
    }

    /// Replace the generated probe rules with one per endpoint, in order.
    ///
    /// Every other rule and every balancer is kept as is.
    pub async fn sync(&self, endpoints: &[Arc<Endpoint>]) -> Result<()> {
        let mut document = self.load().await?;

        let dropped = document.remove_rules_with_prefix(TEST_TAG_PREFIX);
        document.push_rules(endpoints.iter().map(|e| probe_rule(e)));

        self.writer.write_routing(&document).await?;

        info!(
            "routing rules synchronized ({} stale probe rules dropped, {} added)",
            dropped,
            endpoints.len()
        );
        Ok(())
    }

    async fn load(&self) -> Result<RoutingDocument> {
        let content = read_file(self.writer.route_path()).await?;
        if content.trim().is_empty() {
            debug!("routing file missing, writing the default one");
            let document = self.writer.default_routing();
            self.writer.write_routing(&document).await?;
            return Ok(document);
        }

        RoutingDocument::from_json(&content)
    }
}

/// Value the prober sends in its `source` header to select `tag`
pub fn source_attr(tag: &str) -> String {
    url::form_urlencoded::byte_serialize(tag.as_bytes()).collect()
}

/// Route probe requests carrying this endpoint's source header to its test outbound
fn probe_rule(endpoint: &Endpoint) -> RoutingRule {
    let tag = endpoint.tag(TEST_TAG_PREFIX);

    RoutingRule {
        network: Some("tcp".to_string()),
        inbound_tag: Some(vec![TEST_INBOUND_TAG.to_string()]),
        attrs: Some(json!({
            ":method": "GET",
            "source": source_attr(&tag),
        })),
        ..RoutingRule::field(RuleTarget::outbound(tag))
    }
}
