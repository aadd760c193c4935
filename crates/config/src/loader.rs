//! Configuration loading.
//!
//! `servers:` entries are either inline backend definitions or string paths
//! to included files, resolved relative to the including file. `.json`
//! files in Claude Desktop's `mcpServers` format are detected and
//! converted; everything else parses as YAML.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::server::{ServerConfig, ServerType};

/// Directory name under the user config dir holding the default config.
pub const DEFAULT_CONFIG_DIR: &str = "posuer";

/// File name of the default config.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

const EXAMPLE_CONFIG: &str = include_str!("config.example.yaml");

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerEntry {
    Include(String),
    Inline(ServerConfig),
}

#[derive(Debug, Deserialize)]
struct ClaudeConfig {
    #[serde(rename = "mcpServers")]
    mcp_servers: HashMap<String, ServerConfig>,
}

/// Load server configurations from `path`, or from the default location
/// (creating an example config there on first run) when no path is given.
pub fn load(path: Option<&Path>) -> Result<Vec<ServerConfig>> {
    if let Some(path) = path {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        return load_file(path);
    }

    let default_path = default_config_path()?;
    if !default_path.is_file() {
        create_example_config(&default_path)?;
        tracing::info!(path = %default_path.display(), "created example config");
    }

    load_file(&default_path)
}

/// Load server configurations from a specific file.
pub fn load_file(path: &Path) -> Result<Vec<ServerConfig>> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        // Claude Desktop format first: a map of server name to config.
        if let Ok(claude) = serde_json::from_str::<ClaudeConfig>(&data) {
            if !claude.mcp_servers.is_empty() {
                return Ok(convert_claude_config(claude));
            }
        }

        let config: ConfigFile = serde_json::from_str(&data).map_err(|e| {
            ConfigError::Invalid(format!("{}: {e}", path.display()))
        })?;

        return resolve_entries(config, base_dir);
    }

    let config: ConfigFile = serde_yaml::from_str(&data)
        .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;

    resolve_entries(config, base_dir)
}

fn resolve_entries(config: ConfigFile, base_dir: &Path) -> Result<Vec<ServerConfig>> {
    let mut servers = Vec::new();

    for entry in config.servers {
        match entry {
            ServerEntry::Include(include) => {
                let included = load_file(&resolve_include_path(&include, base_dir))?;
                servers.extend(included);
            }
            ServerEntry::Inline(server) => servers.push(server),
        }
    }

    Ok(servers)
}

fn resolve_include_path(include: &str, base_dir: &Path) -> PathBuf {
    let expanded = if let Some(rest) = include.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(include),
        }
    } else {
        PathBuf::from(include)
    };

    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

fn convert_claude_config(claude: ClaudeConfig) -> Vec<ServerConfig> {
    claude
        .mcp_servers
        .into_iter()
        .map(|(name, mut server)| {
            // The map key is the canonical name; entries rarely repeat it.
            if server.name.is_empty() {
                server.name = name;
            }
            if server.server_type.is_none() && server.url.is_empty() {
                server.server_type = Some(ServerType::Stdio);
            }
            server
        })
        .collect()
}

fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::Invalid("could not determine user config directory".to_string())
    })?;

    Ok(config_dir.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE))
}

fn create_example_config(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    fs::write(path, EXAMPLE_CONFIG).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write as _;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_inline_yaml_servers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "config.yaml",
            "servers:\n\
             - name: filesystem\n\
             \x20 command: mcp-fs\n\
             \x20 args: [/tmp]\n\
             - name: remote\n\
             \x20 type: sse\n\
             \x20 url: http://localhost:9000/sse\n",
        );

        let servers = load(Some(&path)).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].name, "filesystem");
        assert_eq!(servers[0].server_type(), ServerType::Stdio);
        assert_eq!(servers[1].name, "remote");
        assert_eq!(servers[1].server_type(), ServerType::Sse);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            load(Some(&missing)),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn includes_are_resolved_relative_to_the_including_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "extra.yaml",
            "servers:\n- name: extra\n\x20 command: mcp-extra\n",
        );
        let path = write_file(
            dir.path(),
            "config.yaml",
            "servers:\n\
             - name: main\n\
             \x20 command: mcp-main\n\
             - extra.yaml\n",
        );

        let servers = load(Some(&path)).unwrap();
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["main", "extra"]);
    }

    #[test]
    fn claude_desktop_json_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "claude.json",
            r#"{"mcpServers": {"memory": {"command": "npx", "args": ["-y", "@modelcontextprotocol/server-memory"]}}}"#,
        );

        let servers = load(Some(&path)).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "memory");
        assert_eq!(servers[0].server_type(), ServerType::Stdio);
        assert_eq!(servers[0].command, "npx");
    }

    #[test]
    fn plain_json_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "config.json",
            r#"{"servers": [{"name": "fs", "command": "mcp-fs"}]}"#,
        );

        let servers = load(Some(&path)).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "fs");
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "config.yaml", "servers: 42\n");
        assert!(matches!(load(Some(&path)), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn example_config_parses() {
        let config: ConfigFile = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        assert!(!config.servers.is_empty());
    }
}
