//! A single backend server configuration and its policy semantics.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::capability::{equivalent, Capability, CapabilityType};
use crate::container::Container;

/// Transport used to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Stdio,
    Sse,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerType::Stdio => write!(f, "stdio"),
            ServerType::Sse => write!(f, "sse"),
        }
    }
}

/// Configuration for one backend MCP server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Unique backend identifier, used as the namespace prefix upstream.
    pub name: String,
    #[serde(rename = "type")]
    pub server_type: Option<ServerType>,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub url: String,
    pub enable: Option<Capability>,
    pub disable: Option<Capability>,
    pub container: Option<Container>,
}

impl ServerConfig {
    /// Effective transport: explicit `type`, else inferred from `url`.
    pub fn server_type(&self) -> ServerType {
        if let Some(server_type) = self.server_type {
            return server_type;
        }

        if !self.url.is_empty() {
            return ServerType::Sse;
        }

        ServerType::Stdio
    }

    /// True when the whole server is disabled by its policy.
    pub fn disabled(&self) -> bool {
        if self.disable.as_ref().is_some_and(|d| d.all) {
            return true;
        }

        let Some(enable) = &self.enable else {
            return false;
        };

        if enable.all {
            return false;
        }

        // Explicit empty whitelist, or a whitelist whose lists are all empty.
        enable.by_type.is_empty()
            || enable.by_type.values().all(|names| names.is_empty())
    }

    /// True when the named capability is exposed upstream.
    ///
    /// Disable wins over enable; an absent enable defaults everything on; a
    /// present enable is a whitelist closed over the types it mentions.
    pub fn enabled(&self, kind: CapabilityType, name: &str) -> bool {
        if self.disabled() {
            return false;
        }

        if let Some(disable) = &self.disable {
            if disable.matches(kind, name) {
                return false;
            }
        }

        let Some(enable) = &self.enable else {
            return true;
        };

        if enable.all {
            return true;
        }

        enable
            .by_type
            .get(&kind)
            .is_some_and(|names| names.iter().any(|n| n == name))
    }

    /// True when the transport parameters are unchanged between two configs,
    /// i.e. a session connected with `self` can serve `other` without a
    /// reconnect.
    pub fn transport_eq(&self, other: &ServerConfig) -> bool {
        self.server_type() == other.server_type()
            && self.command == other.command
            && self.args == other.args
            && self.env == other.env
            && self.url == other.url
            && self.container == other.container
    }

    /// True when the enable/disable policy is equivalent between two configs.
    pub fn policy_eq(&self, other: &ServerConfig) -> bool {
        equivalent(self.enable.as_ref(), other.enable.as_ref())
            && equivalent(self.disable.as_ref(), other.disable.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(all: bool, by_type: &[(CapabilityType, &[&str])]) -> Capability {
        Capability {
            all,
            by_type: by_type
                .iter()
                .map(|(kind, names)| {
                    (*kind, names.iter().map(|n| n.to_string()).collect())
                })
                .collect(),
        }
    }

    #[test]
    fn type_inferred_from_url() {
        let mut config = ServerConfig {
            name: "fs".to_string(),
            command: "server".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.server_type(), ServerType::Stdio);

        config.url = "http://localhost:8080/sse".to_string();
        assert_eq!(config.server_type(), ServerType::Sse);

        config.server_type = Some(ServerType::Stdio);
        assert_eq!(config.server_type(), ServerType::Stdio);
    }

    #[test]
    fn disabled_when_disable_all() {
        let config = ServerConfig {
            name: "fs".to_string(),
            disable: Some(capability(true, &[])),
            ..ServerConfig::default()
        };
        assert!(config.disabled());
    }

    #[test]
    fn disabled_when_enable_is_empty_whitelist() {
        let config = ServerConfig {
            name: "fs".to_string(),
            enable: Some(capability(false, &[])),
            ..ServerConfig::default()
        };
        assert!(config.disabled());

        let config = ServerConfig {
            name: "fs".to_string(),
            enable: Some(capability(false, &[(CapabilityType::Tool, &[])])),
            ..ServerConfig::default()
        };
        assert!(config.disabled());
    }

    #[test]
    fn not_disabled_with_populated_whitelist() {
        let config = ServerConfig {
            name: "fs".to_string(),
            enable: Some(capability(false, &[(CapabilityType::Tool, &["t1"])])),
            ..ServerConfig::default()
        };
        assert!(!config.disabled());
    }

    // Disabled servers expose nothing, whatever the enable list says.
    #[test]
    fn disabled_server_enables_nothing() {
        let config = ServerConfig {
            name: "fs".to_string(),
            enable: Some(capability(false, &[(CapabilityType::Tool, &["t1"])])),
            disable: Some(capability(true, &[])),
            ..ServerConfig::default()
        };

        assert!(config.disabled());
        for kind in CapabilityType::ALL {
            assert!(!config.enabled(kind, "t1"));
        }
    }

    #[test]
    fn absent_enable_defaults_everything_on() {
        let config = ServerConfig {
            name: "fs".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.enabled(CapabilityType::Tool, "anything"));
        assert!(config.enabled(CapabilityType::Template, "anything"));
    }

    #[test]
    fn enable_all_defaults_everything_on() {
        let config = ServerConfig {
            name: "fs".to_string(),
            enable: Some(capability(true, &[])),
            ..ServerConfig::default()
        };
        assert!(config.enabled(CapabilityType::Prompt, "anything"));
    }

    #[test]
    fn whitelist_is_closed_over_mentioned_types() {
        let config = ServerConfig {
            name: "mem".to_string(),
            enable: Some(capability(
                false,
                &[(CapabilityType::Tool, &["create_entities", "read_graph"])],
            )),
            ..ServerConfig::default()
        };

        assert!(config.enabled(CapabilityType::Tool, "create_entities"));
        assert!(config.enabled(CapabilityType::Tool, "read_graph"));
        assert!(!config.enabled(CapabilityType::Tool, "delete_entities"));
        // Prompts are not mentioned in the whitelist, so none pass.
        assert!(!config.enabled(CapabilityType::Prompt, "summarize"));
    }

    #[test]
    fn disable_overrides_enable() {
        let config = ServerConfig {
            name: "mem".to_string(),
            enable: Some(capability(false, &[(CapabilityType::Tool, &["t1"])])),
            disable: Some(capability(false, &[(CapabilityType::Tool, &["t1"])])),
            ..ServerConfig::default()
        };

        assert!(!config.enabled(CapabilityType::Tool, "t1"));
    }

    #[test]
    fn disable_of_other_names_leaves_rest_enabled() {
        let config = ServerConfig {
            name: "fs".to_string(),
            disable: Some(capability(false, &[(CapabilityType::Tool, &["rm"])])),
            ..ServerConfig::default()
        };

        assert!(!config.enabled(CapabilityType::Tool, "rm"));
        assert!(config.enabled(CapabilityType::Tool, "ls"));
        assert!(config.enabled(CapabilityType::Prompt, "rm"));
    }

    #[test]
    fn transport_and_policy_diffs_are_independent() {
        let base = ServerConfig {
            name: "fs".to_string(),
            command: "mcp-fs".to_string(),
            args: vec!["--root".to_string(), "/tmp".to_string()],
            ..ServerConfig::default()
        };

        let mut policy_only = base.clone();
        policy_only.enable = Some(capability(false, &[(CapabilityType::Tool, &["ls"])]));
        assert!(base.transport_eq(&policy_only));
        assert!(!base.policy_eq(&policy_only));

        let mut transport = base.clone();
        transport.args.push("--readonly".to_string());
        assert!(!base.transport_eq(&transport));
        assert!(base.policy_eq(&transport));
    }

    #[test]
    fn parses_full_server_entry() {
        let config: ServerConfig = serde_yaml::from_str(
            "name: memory\n\
             type: stdio\n\
             command: npx\n\
             args: [-y, '@modelcontextprotocol/server-memory']\n\
             env:\n  MEMORY_PATH: /tmp/memory.json\n\
             enable:\n  tools: [create_entities]\n\
             container: false\n",
        )
        .unwrap();

        assert_eq!(config.name, "memory");
        assert_eq!(config.server_type(), ServerType::Stdio);
        assert_eq!(config.command, "npx");
        assert!(config.enabled(CapabilityType::Tool, "create_entities"));
        assert!(!config.enabled(CapabilityType::Tool, "read_graph"));
        assert!(config.container.as_ref().unwrap().is_disabled());
    }
}
