//! Xray engine integration
//!
//! Everything that touches the engine lives here: the generated
//! configuration directory, the routing rule file and the process itself.
//!
//! The engine loads every JSON file of its `-confdir` in name order and
//! merges them, so each concern is written to its own numbered fragment.

pub mod files;
pub mod fragments;
pub mod process;
pub mod routing;
pub mod supervisor;

pub use files::{read_file, remove_by_prefix, write_file, CleanupReport};
pub use fragments::ConfigWriter;
pub use process::EngineProcess;
pub use routing::RoutingRuleSynchronizer;
pub use supervisor::{Supervisor, SupervisorState};

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::error::Result;

pub const API_FILE: &str = "001api.json";
pub const LOG_FILE: &str = "002log.json";
pub const DNS_FILE: &str = "003dns.json";
pub const POLICY_FILE: &str = "004policy.json";
pub const INBOUND_FILE: &str = "005inbound.json";
pub const BASE_OUTBOUND_FILE: &str = "006base_outbound.json";
pub const ROUTE_FILE: &str = "006route.json";

/// File name prefix of the per-endpoint probe outbounds
pub const TEST_FILE_PREFIX: &str = "009_test_";
/// File name prefix of the selected endpoint outbounds
pub const PROXY_FILE_PREFIX: &str = "009_proxy_";
/// Suffix shared by every per-endpoint file
pub const TAIL_FILE_SUFFIX: &str = "_tail.json";

/// Tag prefix of outbounds used for probing
pub const TEST_TAG_PREFIX: &str = "test_";
/// Tag prefix of outbounds the balancer picks from
pub const PROXY_TAG_PREFIX: &str = "proxy_";

pub const BALANCER_TAG: &str = "proxy-balancer";
pub const TEST_INBOUND_TAG: &str = "inbounds-test";
pub const HTTP_INBOUND_TAG: &str = "inbounds-http";
pub const SOCKS_INBOUND_TAG: &str = "inbounds-socks";
pub const API_TAG: &str = "api";
pub const DIRECT_TAG: &str = "direct";
pub const BLOCKED_TAG: &str = "blocked";

/// Serialize with four-space indentation, the layout of every generated file
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;

    // serde_json only ever emits valid UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
