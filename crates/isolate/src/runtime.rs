//! Container runtime detection.

use std::env;
use std::path::PathBuf;

use crate::{IsolateError, Result};

/// Docker runtime command name.
pub const DOCKER_RUNTIME: &str = "docker";

/// Podman runtime command name.
pub const PODMAN_RUNTIME: &str = "podman";

/// Find a container runtime on `PATH`, preferring podman over docker.
pub fn detect_runtime() -> Result<String> {
    for runtime in [PODMAN_RUNTIME, DOCKER_RUNTIME] {
        if let Some(path) = find_in_path(runtime) {
            return Ok(path.to_string_lossy().into_owned());
        }
    }

    Err(IsolateError::NoContainerRuntime)
}

/// True if the command already invokes a container runtime.
pub fn is_container_command(command: &str) -> bool {
    command == DOCKER_RUNTIME
        || command == PODMAN_RUNTIME
        || command.ends_with(&format!("/{DOCKER_RUNTIME}"))
        || command.ends_with(&format!("/{PODMAN_RUNTIME}"))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;

    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_commands_are_recognized() {
        assert!(is_container_command("docker"));
        assert!(is_container_command("podman"));
        assert!(is_container_command("/usr/bin/docker"));
        assert!(is_container_command("/opt/podman/bin/podman"));
        assert!(!is_container_command("npx"));
        assert!(!is_container_command("dockerd"));
    }
}
