//! typed layer metadata and the repositories map
//!
//! two generations of exports share these documents. the oldest exports name
//! the container config `ContainerConfig`; everything since uses
//! `container_config`. reads accept either, writes always emit the newer
//! name. the per-layer `config` sub-document is kept free-form so unknown
//! fields survive a round trip.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};

/// container configuration recorded for a layer (PascalCase on the wire)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerConfig {
    pub hostname: String,
    pub domainname: String,
    pub entrypoint: Option<Vec<String>>,
    pub user: String,
    pub memory: i64,
    pub memory_swap: i64,
    pub cpu_shares: i64,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub port_specs: Option<Vec<String>>,
    pub tty: bool,
    pub open_stdin: bool,
    pub stdin_once: bool,
    pub network_disabled: bool,
    pub on_build: Option<Vec<String>>,
    pub env: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub dns: Option<Vec<String>>,
    pub image: String,
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
    pub volumes_from: String,
    pub labels: Option<BTreeMap<String, String>>,
}

/// per-layer metadata record (the `json` file in each layer directory)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default = "epoch")]
    pub created: DateTime<Utc>,
    // docker 1.0.0/1.0.1 field name; migrated to container_config on read
    #[serde(
        rename = "ContainerConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    v1_container_config: Option<ContainerConfig>,
    #[serde(
        rename = "container_config",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    v2_container_config: Option<ContainerConfig>,
    #[serde(default)]
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub docker_version: String,
    #[serde(default)]
    pub architecture: String,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl LayerConfig {
    /// config for a freshly synthesized layer
    pub fn new(id: impl Into<String>, parent: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: parent.into(),
            comment: comment.into(),
            created: Utc::now(),
            v1_container_config: None,
            v2_container_config: Some(ContainerConfig::default()),
            container: String::new(),
            config: None,
            docker_version: "0.1.2".to_string(),
            architecture: "x86_64".to_string(),
        }
    }

    /// move the oldest exports' field name onto the one we always write
    pub fn normalize(&mut self) {
        if self.v2_container_config.is_none() {
            if let Some(v1) = self.v1_container_config.take() {
                self.v2_container_config = Some(v1);
            }
        }
        self.v1_container_config = None;
    }

    pub fn container_config(&self) -> Option<&ContainerConfig> {
        self.v2_container_config
            .as_ref()
            .or(self.v1_container_config.as_ref())
    }

    pub fn container_config_mut(&mut self) -> &mut ContainerConfig {
        self.normalize();
        self.v2_container_config.get_or_insert_with(ContainerConfig::default)
    }

    /// the layer's recorded build command (joined `Cmd` vector)
    pub fn command(&self) -> String {
        self.container_config()
            .and_then(|c| c.cmd.as_deref())
            .map(|cmd| cmd.join(" "))
            .unwrap_or_default()
    }
}

/// `repo -> tag -> layer id`
pub type Repositories = BTreeMap<String, BTreeMap<String, String>>;

/// read the `repositories` file; absence is an empty map
pub fn read_repositories(path: &Path) -> Result<Repositories> {
    if !path.exists() {
        return Ok(Repositories::new());
    }
    read_json_file(path)
}

/// the number of distinct layer ids named by tags across all repos
///
/// one image exported under several tags still has a single target; two
/// distinct targets mean a multi-image export.
pub fn distinct_tag_targets(repositories: &Repositories) -> usize {
    repositories
        .values()
        .flat_map(|tags| tags.values())
        .collect::<BTreeSet<_>>()
        .len()
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_path(path)?;
    serde_json::from_reader(file).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_path(path)?;
    serde_json::to_writer(file, value).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}
