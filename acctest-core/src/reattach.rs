//! Reattach records handed to the CLI in `TF_REATTACH_PROVIDERS`

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

pub const ENV_REATTACH_PROVIDERS: &str = "TF_REATTACH_PROVIDERS";

/// How the CLI connects to an already running provider server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReattachConfig {
    pub protocol: String,
    pub protocol_version: u32,
    pub pid: u32,
    pub test: bool,
    pub addr: ReattachConfigAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReattachConfigAddr {
    pub network: String,
    pub string: String,
}

impl ReattachConfig {
    /// Record for a test server listening on a TCP address
    pub fn tcp(addr: SocketAddr, protocol_version: u32) -> Self {
        Self {
            protocol: "grpc".to_string(),
            protocol_version,
            pid: std::process::id(),
            test: true,
            addr: ReattachConfigAddr {
                network: "tcp".to_string(),
                string: addr.to_string(),
            },
        }
    }
}

/// Reattach records keyed by provider address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReattachInfo(pub BTreeMap<String, ReattachConfig>);

impl ReattachInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: impl Into<String>, config: ReattachConfig) {
        self.0.insert(address.into(), config);
    }

    pub fn get(&self, address: &str) -> Option<&ReattachConfig> {
        self.0.get(address)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: ReattachInfo) {
        self.0.extend(other.0);
    }

    /// JSON value for `TF_REATTACH_PROVIDERS`
    pub fn to_env_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_pascal_case_keys() {
        let addr: SocketAddr = "127.0.0.1:4321".parse().unwrap();
        let mut info = ReattachInfo::new();
        info.insert(
            "registry.terraform.io/hashicorp/example",
            ReattachConfig::tcp(addr, 6),
        );

        let value: serde_json::Value =
            serde_json::from_str(&info.to_env_value().unwrap()).unwrap();
        let record = &value["registry.terraform.io/hashicorp/example"];
        assert_eq!(record["Protocol"], "grpc");
        assert_eq!(record["ProtocolVersion"], 6);
        assert_eq!(record["Test"], true);
        assert_eq!(record["Pid"], std::process::id());
        assert_eq!(record["Addr"]["Network"], "tcp");
        assert_eq!(record["Addr"]["String"], "127.0.0.1:4321");
    }

    #[test]
    fn parses_back() {
        let json = r#"{"registry.terraform.io/-/example":{"Protocol":"grpc","ProtocolVersion":5,"Pid":1,"Test":true,"Addr":{"Network":"tcp","String":"127.0.0.1:1"}}}"#;
        let info: ReattachInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(
            info.get("registry.terraform.io/-/example").unwrap().protocol_version,
            5
        );
    }
}
