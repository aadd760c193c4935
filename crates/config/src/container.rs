//! Optional container isolation spec for a backend.
//!
//! Accepts three shapes: `false` to opt out of automatic container
//! detection, a bare string naming the image, or a full map.

use std::collections::HashMap;

use serde::Deserialize;

/// Container isolation settings, opaque to the interposer core and
/// consumed by the isolator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    /// Container image to run.
    pub image: String,
    /// Host path to container path mappings.
    pub volumes: HashMap<String, String>,
    /// Environment variables passed to the container.
    pub env: HashMap<String, String>,
    /// Network mode (host, bridge, ...).
    pub network: String,
    /// User to run as inside the container.
    pub user: String,
    /// Working directory inside the container.
    pub workdir: String,
    /// Extra arguments for the container runtime.
    pub extra_args: Vec<String>,
}

impl Container {
    /// True when the spec was `container: false`, opting out of isolation.
    pub fn is_disabled(&self) -> bool {
        self.image.is_empty()
            && self.volumes.is_empty()
            && self.env.is_empty()
            && self.network.is_empty()
            && self.user.is_empty()
            && self.workdir.is_empty()
            && self.extra_args.is_empty()
    }

    /// True when the spec names an image to run.
    pub fn is_configured(&self) -> bool {
        !self.image.is_empty()
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ContainerSpec {
    image: String,
    volumes: HashMap<String, String>,
    env: HashMap<String, String>,
    network: String,
    user: String,
    workdir: String,
    #[serde(rename = "args")]
    extra_args: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContainerRepr {
    Flag(bool),
    Image(String),
    Full(ContainerSpec),
}

impl<'de> Deserialize<'de> for Container {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr = ContainerRepr::deserialize(deserializer).map_err(|_| {
            serde::de::Error::custom(
                "container config must be false, an image name, or a map",
            )
        })?;

        match repr {
            ContainerRepr::Flag(false) => Ok(Container::default()),
            ContainerRepr::Flag(true) => Err(serde::de::Error::custom(
                "boolean true is not a valid container configuration",
            )),
            ContainerRepr::Image(image) => Ok(Container {
                image,
                ..Container::default()
            }),
            ContainerRepr::Full(spec) => Ok(Container {
                image: spec.image,
                volumes: spec.volumes,
                env: spec.env,
                network: spec.network,
                user: spec.user,
                workdir: spec.workdir,
                extra_args: spec.extra_args,
            }),
        }
    }
}
