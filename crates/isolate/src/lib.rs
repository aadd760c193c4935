//! Launch planning for backend MCP servers.
//!
//! Turns a [`ServerConfig`] into a [`Launch`]: an SSE endpoint, a plain
//! child process, or a child process wrapped in a container runtime.
//! Known package-runner commands (`npx`, `uvx`) are containerized by
//! default with a per-command cache volume; `container: false` opts out.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use posuer_config::{Container, ServerConfig, ServerType};
use thiserror::Error;

mod runtime;

pub use runtime::{detect_runtime, is_container_command, DOCKER_RUNTIME, PODMAN_RUNTIME};

/// Default container image for `npx` backends.
pub const NPX_IMAGE: &str = "docker.io/node:alpine";

/// Default container image for `uvx` backends.
pub const UVX_IMAGE: &str = "ghcr.io/astral-sh/uv:alpine";

/// Working directory mounted into default containers.
pub const DEFAULT_WORKDIR: &str = "/code";

#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("stdio server '{0}' has no command")]
    MissingCommand(String),

    #[error("sse server '{0}' has no url")]
    MissingUrl(String),

    #[error("no container runtime found on PATH (tried podman, docker)")]
    NoContainerRuntime,

    #[error("could not determine user cache directory")]
    NoCacheDir,

    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, IsolateError>;

/// How to reach a backend: spawn a process or connect to a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
    },
}

/// Compute the launch plan for a backend.
pub fn launch_plan(config: &ServerConfig) -> Result<Launch> {
    match config.server_type() {
        ServerType::Sse => {
            if config.url.is_empty() {
                return Err(IsolateError::MissingUrl(config.name.clone()));
            }

            Ok(Launch::Sse {
                url: config.url.clone(),
            })
        }
        ServerType::Stdio => stdio_plan(config),
    }
}

fn stdio_plan(config: &ServerConfig) -> Result<Launch> {
    if config.command.is_empty() {
        return Err(IsolateError::MissingCommand(config.name.clone()));
    }

    // Already container-wrapped commands pass through untouched.
    if is_container_command(&config.command) {
        return Ok(plain(config));
    }

    match &config.container {
        Some(container) if container.is_disabled() => Ok(plain(config)),
        Some(container) if container.is_configured() => wrap(config, container.clone()),
        _ => match default_image_for(&config.command) {
            Some(image) => default_container_plan(config, image),
            None => Ok(plain(config)),
        },
    }
}

fn plain(config: &ServerConfig) -> Launch {
    Launch::Stdio {
        command: config.command.clone(),
        args: config.args.clone(),
        env: config.env.clone(),
    }
}

fn wrap(config: &ServerConfig, mut container: Container) -> Result<Launch> {
    // Server env is passed through to the containerized process.
    for (key, value) in &config.env {
        container.env.insert(key.clone(), value.clone());
    }

    let runtime = detect_runtime()?;
    let args = container_args(&config.command, &config.args, &container);

    tracing::debug!(
        backend = %config.name,
        runtime = %runtime,
        image = %container.image,
        "containerizing backend"
    );

    Ok(Launch::Stdio {
        command: runtime,
        args,
        env: config.env.clone(),
    })
}

fn default_container_plan(config: &ServerConfig, image: &str) -> Result<Launch> {
    let mut container = Container {
        image: image.to_string(),
        volumes: default_volumes_for(&config.command)?,
        workdir: DEFAULT_WORKDIR.to_string(),
        ..Container::default()
    };

    // Mount the current directory at the workdir unless a volume already
    // targets it.
    if !container.volumes.values().any(|target| target == DEFAULT_WORKDIR) {
        if let Ok(cwd) = env::current_dir() {
            container
                .volumes
                .insert(cwd.to_string_lossy().into_owned(), DEFAULT_WORKDIR.to_string());
        }
    }

    wrap(config, container)
}

/// Default container image for a command, if it has one.
pub fn default_image_for(command: &str) -> Option<&'static str> {
    match command {
        "npx" => Some(NPX_IMAGE),
        "uvx" => Some(UVX_IMAGE),
        _ => None,
    }
}

/// Default cache volume mappings for a command.
pub fn default_volumes_for(command: &str) -> Result<HashMap<String, String>> {
    let cache_root = dirs::cache_dir().ok_or(IsolateError::NoCacheDir)?;
    let cache_dir = cache_root
        .join(posuer_config::DEFAULT_CONFIG_DIR)
        .join(command);

    std::fs::create_dir_all(&cache_dir).map_err(|source| IsolateError::CacheDir {
        path: cache_dir.clone(),
        source,
    })?;

    let host = cache_dir.to_string_lossy().into_owned();
    let mut volumes = HashMap::new();

    match command {
        "npx" => {
            volumes.insert(host, "/root/.npm".to_string());
        }
        "uvx" => {
            volumes.insert(host, "/root/.cache/uv".to_string());
        }
        _ => {}
    }

    Ok(volumes)
}

/// Build the container runtime argument list wrapping `command`.
pub fn container_args(command: &str, args: &[String], container: &Container) -> Vec<String> {
    let mut out = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--interactive".to_string(),
    ];

    // Sorted for a stable argument list.
    let mut volumes: Vec<_> = container.volumes.iter().collect();
    volumes.sort();
    for (host, target) in volumes {
        out.push("--volume".to_string());
        out.push(format!("{host}:{target}"));
    }

    let mut env: Vec<_> = container.env.iter().collect();
    env.sort();
    for (key, value) in env {
        out.push("--env".to_string());
        out.push(format!("{key}={value}"));
    }

    if !container.network.is_empty() {
        out.push("--network".to_string());
        out.push(container.network.clone());
    }

    if !container.user.is_empty() {
        out.push("--user".to_string());
        out.push(container.user.clone());
    }

    if !container.workdir.is_empty() {
        out.push("--workdir".to_string());
        out.push(container.workdir.clone());
    }

    out.extend(container.extra_args.iter().cloned());
    out.push(container.image.clone());
    out.push(command.to_string());
    out.extend(args.iter().cloned());

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config(name: &str, command: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            command: command.to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn sse_plan_uses_the_url() {
        let config = ServerConfig {
            name: "remote".to_string(),
            url: "http://localhost:8080/sse".to_string(),
            ..ServerConfig::default()
        };

        assert_eq!(
            launch_plan(&config).unwrap(),
            Launch::Sse {
                url: "http://localhost:8080/sse".to_string()
            }
        );
    }

    #[test]
    fn sse_without_url_is_an_error() {
        let config = ServerConfig {
            name: "remote".to_string(),
            server_type: Some(ServerType::Sse),
            ..ServerConfig::default()
        };

        assert!(matches!(
            launch_plan(&config),
            Err(IsolateError::MissingUrl(_))
        ));
    }

    #[test]
    fn stdio_without_command_is_an_error() {
        let config = ServerConfig {
            name: "fs".to_string(),
            ..ServerConfig::default()
        };

        assert!(matches!(
            launch_plan(&config),
            Err(IsolateError::MissingCommand(_))
        ));
    }

    #[test]
    fn plain_command_passes_through() {
        let mut config = stdio_config("fs", "mcp-filesystem");
        config.args = vec!["/tmp".to_string()];
        config.env.insert("TOKEN".to_string(), "secret".to_string());

        let Launch::Stdio { command, args, env } = launch_plan(&config).unwrap() else {
            panic!("expected a stdio launch");
        };
        assert_eq!(command, "mcp-filesystem");
        assert_eq!(args, vec!["/tmp"]);
        assert_eq!(env.get("TOKEN").unwrap(), "secret");
    }

    #[test]
    fn disabled_container_skips_default_isolation() {
        let mut config = stdio_config("mem", "npx");
        config.container = Some(Container::default());

        let Launch::Stdio { command, .. } = launch_plan(&config).unwrap() else {
            panic!("expected a stdio launch");
        };
        assert_eq!(command, "npx");
    }

    #[test]
    fn container_commands_are_not_rewrapped() {
        let config = stdio_config("fs", "docker");
        let Launch::Stdio { command, .. } = launch_plan(&config).unwrap() else {
            panic!("expected a stdio launch");
        };
        assert_eq!(command, "docker");
    }

    #[test]
    fn default_images_cover_package_runners() {
        assert_eq!(default_image_for("npx"), Some(NPX_IMAGE));
        assert_eq!(default_image_for("uvx"), Some(UVX_IMAGE));
        assert_eq!(default_image_for("python3"), None);
    }

    #[test]
    fn container_args_assemble_in_order() {
        let container = Container {
            image: "docker.io/node:alpine".to_string(),
            volumes: HashMap::from([("/home/me/.npm".to_string(), "/root/.npm".to_string())]),
            env: HashMap::from([("TOKEN".to_string(), "secret".to_string())]),
            network: "host".to_string(),
            user: "node".to_string(),
            workdir: "/code".to_string(),
            extra_args: vec!["--pull".to_string(), "never".to_string()],
        };

        let args = container_args(
            "npx",
            &["-y".to_string(), "server-memory".to_string()],
            &container,
        );

        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--interactive",
                "--volume",
                "/home/me/.npm:/root/.npm",
                "--env",
                "TOKEN=secret",
                "--network",
                "host",
                "--user",
                "node",
                "--workdir",
                "/code",
                "--pull",
                "never",
                "docker.io/node:alpine",
                "npx",
                "-y",
                "server-memory",
            ]
        );
    }
}
