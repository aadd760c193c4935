//! Name rewriting between backend-local and merged namespaces.
//!
//! The separators are observable on the wire and load-bearing for inverse
//! mapping, so they are fixed: tools, resources, and templates use `-` in
//! names, prompts use `.`, and resource URIs are prefixed with `{backend}+`.

use posuer_config::CapabilityType;

use crate::error::{Error, Result};

/// Characters that backend names must not contain, because they double as
/// namespace separators.
pub const SEPARATORS: [char; 3] = ['-', '.', '+'];

/// Qualified tool name: `{backend}-{raw}`.
pub fn tool_name(backend: &str, raw: &str) -> String {
    format!("{backend}-{raw}")
}

/// Qualified prompt name: `{backend}.{raw}`.
pub fn prompt_name(backend: &str, raw: &str) -> String {
    format!("{backend}.{raw}")
}

/// Qualified resource (or template) name: `{backend}-{raw}`.
pub fn resource_name(backend: &str, raw: &str) -> String {
    format!("{backend}-{raw}")
}

/// Qualified resource URI (or URI template text): `{backend}+{raw}`.
pub fn resource_uri(backend: &str, raw: &str) -> String {
    format!("{backend}+{raw}")
}

/// Qualified name for any capability kind.
pub fn qualified_name(backend: &str, kind: CapabilityType, raw: &str) -> String {
    match kind {
        CapabilityType::Tool => tool_name(backend, raw),
        CapabilityType::Prompt => prompt_name(backend, raw),
        CapabilityType::Resource | CapabilityType::Template => resource_name(backend, raw),
    }
}

/// Invert [`qualified_name`]: recover the raw name from a qualified one.
///
/// Returns `None` when the qualified name does not carry this backend's
/// prefix.
pub fn raw_name(backend: &str, kind: CapabilityType, qualified: &str) -> Option<String> {
    let separator = match kind {
        CapabilityType::Prompt => '.',
        _ => '-',
    };

    let rest = qualified.strip_prefix(backend)?;
    let raw = rest.strip_prefix(separator)?;
    Some(raw.to_string())
}

/// Strip the `{backend}+` prefix from an inbound resource URI.
///
/// Used on the read path for resource templates, where the upstream client
/// sends an expansion of the rewritten template.
pub fn strip_uri_prefix<'a>(backend: &str, uri: &'a str) -> &'a str {
    uri.strip_prefix(backend)
        .and_then(|rest| rest.strip_prefix('+'))
        .unwrap_or(uri)
}

/// Reject backend names that would make rewritten names ambiguous.
pub fn validate_backend_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SEPARATORS) {
        return Err(Error::InvalidBackendName(name.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_use_type_specific_separators() {
        assert_eq!(tool_name("filesystem", "read_file"), "filesystem-read_file");
        assert_eq!(prompt_name("mem", "summarize"), "mem.summarize");
        assert_eq!(resource_name("fs", "config"), "fs-config");
        assert_eq!(resource_uri("fs", "file:///etc/motd"), "fs+file:///etc/motd");
    }

    #[test]
    fn raw_name_round_trips() {
        for kind in CapabilityType::ALL {
            let qualified = qualified_name("backend", kind, "item_name");
            assert_eq!(
                raw_name("backend", kind, &qualified).as_deref(),
                Some("item_name")
            );
        }
    }

    #[test]
    fn raw_name_rejects_foreign_prefixes() {
        assert_eq!(raw_name("fs", CapabilityType::Tool, "mem-read_graph"), None);
        assert_eq!(raw_name("fs", CapabilityType::Prompt, "fs-oops"), None);
    }

    #[test]
    fn uri_prefix_strips_only_own_backend() {
        assert_eq!(
            strip_uri_prefix("fs", "fs+file:///tmp/x"),
            "file:///tmp/x"
        );
        assert_eq!(
            strip_uri_prefix("fs", "mem+file:///tmp/x"),
            "mem+file:///tmp/x"
        );
    }

    // Rewritten names from distinct backends never collide, given valid
    // backend names.
    #[test]
    fn namespaces_are_disjoint_across_backends() {
        let backends = ["fs", "mem"];
        let raws = ["read", "fs-read", "a.b"];

        for kind in CapabilityType::ALL {
            for raw_a in raws {
                for raw_b in raws {
                    let a = qualified_name(backends[0], kind, raw_a);
                    let b = qualified_name(backends[1], kind, raw_b);
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn separator_characters_are_rejected_in_backend_names() {
        assert!(validate_backend_name("filesystem").is_ok());
        assert!(validate_backend_name("fs_local").is_ok());
        assert!(validate_backend_name("my-server").is_err());
        assert!(validate_backend_name("my.server").is_err());
        assert!(validate_backend_name("my+server").is_err());
        assert!(validate_backend_name("").is_err());
    }
}
