//! Enable/disable policy for backend capabilities.
//!
//! A policy value accepts three shapes in YAML/JSON:
//! a boolean (`enable: true`), a bare list of tool names
//! (`enable: [read_file]`), or a map of capability types to names
//! (`enable: {tools: [read_file], prompts: summarize}`).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a capability exposed over MCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityType {
    #[serde(rename = "tools")]
    Tool,
    #[serde(rename = "prompts")]
    Prompt,
    #[serde(rename = "resources")]
    Resource,
    #[serde(rename = "templates")]
    Template,
}

impl CapabilityType {
    pub const ALL: [CapabilityType; 4] = [
        CapabilityType::Tool,
        CapabilityType::Prompt,
        CapabilityType::Resource,
        CapabilityType::Template,
    ];
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityType::Tool => write!(f, "tools"),
            CapabilityType::Prompt => write!(f, "prompts"),
            CapabilityType::Resource => write!(f, "resources"),
            CapabilityType::Template => write!(f, "templates"),
        }
    }
}

/// Which capabilities a policy matches.
///
/// Exactly one of the two forms is populated: `all` matches every name of
/// every type, `by_type` matches the listed names per type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capability {
    pub all: bool,
    pub by_type: HashMap<CapabilityType, Vec<String>>,
}

impl Capability {
    /// True if this policy matches the given capability name.
    pub fn matches(&self, kind: CapabilityType, name: &str) -> bool {
        if self.all {
            return true;
        }

        self.by_type
            .get(&kind)
            .is_some_and(|names| names.iter().any(|n| n == name))
    }

    /// Order-insensitive equivalence of two policy values.
    pub fn equivalent(&self, other: &Capability) -> bool {
        if self.all != other.all {
            return false;
        }

        if self.all {
            return true;
        }

        if self.by_type.len() != other.by_type.len() {
            return false;
        }

        self.by_type.iter().all(|(kind, names)| {
            other.by_type.get(kind).is_some_and(|other_names| {
                names.len() == other_names.len()
                    && names.iter().all(|n| other_names.contains(n))
            })
        })
    }
}

/// Order-insensitive equivalence of two optional policy values.
pub fn equivalent(first: Option<&Capability>, second: Option<&Capability>) -> bool {
    match (first, second) {
        (None, None) => true,
        (Some(a), Some(b)) => a.equivalent(b),
        _ => false,
    }
}

/// One name or a list of names, as they appear in config files.
#[derive(Deserialize)]
#[serde(untagged)]
enum NameList {
    One(String),
    Many(Vec<String>),
}

impl From<NameList> for Vec<String> {
    fn from(value: NameList) -> Self {
        match value {
            NameList::One(name) => vec![name],
            NameList::Many(names) => names,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CapabilityRepr {
    All(bool),
    ToolNames(Vec<String>),
    ByType(HashMap<CapabilityType, NameList>),
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr = CapabilityRepr::deserialize(deserializer).map_err(|_| {
            serde::de::Error::custom(
                "capability config must be a boolean, a list of names, or a map of types to names",
            )
        })?;

        Ok(match repr {
            CapabilityRepr::All(all) => Capability {
                all,
                by_type: HashMap::new(),
            },
            // A bare list is shorthand for tool names.
            CapabilityRepr::ToolNames(names) => Capability {
                all: false,
                by_type: HashMap::from([(CapabilityType::Tool, names)]),
            },
            CapabilityRepr::ByType(by_type) => Capability {
                all: false,
                by_type: by_type
                    .into_iter()
                    .map(|(kind, names)| (kind, names.into()))
                    .collect(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_boolean_form() {
        let capability: Capability = serde_yaml::from_str("true").unwrap();
        assert!(capability.all);
        assert!(capability.by_type.is_empty());

        let capability: Capability = serde_yaml::from_str("false").unwrap();
        assert!(!capability.all);
        assert!(capability.by_type.is_empty());
    }

    #[test]
    fn parses_bare_list_as_tools() {
        let capability: Capability = serde_yaml::from_str("[read_file, write_file]").unwrap();
        assert!(!capability.all);
        assert_eq!(
            capability.by_type.get(&CapabilityType::Tool).unwrap(),
            &["read_file".to_string(), "write_file".to_string()]
        );
    }

    #[test]
    fn parses_type_map_with_scalar_and_list_values() {
        let capability: Capability = serde_yaml::from_str(
            "tools: [create_entities, read_graph]\nprompts: summarize\n",
        )
        .unwrap();

        assert!(!capability.all);
        assert_eq!(
            capability.by_type.get(&CapabilityType::Tool).unwrap().len(),
            2
        );
        assert_eq!(
            capability.by_type.get(&CapabilityType::Prompt).unwrap(),
            &["summarize".to_string()]
        );
    }

    #[test]
    fn parses_json_forms() {
        let capability: Capability = serde_json::from_str("true").unwrap();
        assert!(capability.all);

        let capability: Capability =
            serde_json::from_str(r#"{"resources": ["config"], "templates": ["logs"]}"#).unwrap();
        assert!(capability.matches(CapabilityType::Resource, "config"));
        assert!(capability.matches(CapabilityType::Template, "logs"));
        assert!(!capability.matches(CapabilityType::Tool, "config"));
    }

    #[test]
    fn rejects_invalid_shapes() {
        assert!(serde_yaml::from_str::<Capability>("42").is_err());
    }

    #[test]
    fn matches_respects_all_and_by_type() {
        let everything = Capability {
            all: true,
            by_type: HashMap::new(),
        };
        assert!(everything.matches(CapabilityType::Prompt, "anything"));

        let scoped = Capability {
            all: false,
            by_type: HashMap::from([(CapabilityType::Tool, vec!["t1".to_string()])]),
        };
        assert!(scoped.matches(CapabilityType::Tool, "t1"));
        assert!(!scoped.matches(CapabilityType::Tool, "t2"));
        assert!(!scoped.matches(CapabilityType::Prompt, "t1"));
    }

    #[test]
    fn equivalence_is_order_insensitive() {
        let first = Capability {
            all: false,
            by_type: HashMap::from([(
                CapabilityType::Tool,
                vec!["a".to_string(), "b".to_string()],
            )]),
        };
        let second = Capability {
            all: false,
            by_type: HashMap::from([(
                CapabilityType::Tool,
                vec!["b".to_string(), "a".to_string()],
            )]),
        };

        assert!(first.equivalent(&second));
        assert!(equivalent(Some(&first), Some(&second)));
        assert!(equivalent(None, None));
        assert!(!equivalent(Some(&first), None));

        let all = Capability {
            all: true,
            by_type: HashMap::new(),
        };
        assert!(!first.equivalent(&all));
    }
}
