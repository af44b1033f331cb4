//! newer-format `manifest.json` and image config regeneration
//!
//! both documents are held free-form so unknown fields and their ordering
//! survive the rewrite; only the layer list, repo tags, `rootfs.diff_ids`
//! and `history` are touched.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::archive::ImageArchive;
use crate::error::{Error, IoResultExt, Result};
use crate::layer::TAR_FILE;
use crate::metadata::{read_json_file, write_json_file};

pub const MANIFEST_FILE: &str = "manifest.json";

/// digest record for one surviving layer, in history order
pub struct LayerDigest {
    pub id: String,
    /// archive-relative tar path (`<id>/layer.tar`)
    pub tar_path: String,
    /// hex sha-256 of the packed tar
    pub digest: String,
}

/// `manifest.json` plus the image config it references
pub struct Manifest {
    manifest_path: PathBuf,
    config_path: PathBuf,
    manifest: Value,
    config: Value,
}

impl Manifest {
    /// load from staging; `None` for older-format archives
    pub fn load(staging: &Path) -> Result<Option<Self>> {
        let manifest_path = staging.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(None);
        }

        let manifest: Value = read_json_file(&manifest_path)?;
        let config_name = manifest
            .get(0)
            .and_then(|entry| entry.get("Config"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::MalformedArchive("manifest.json has no Config entry".to_string())
            })?;

        let config_path = staging.join(config_name);
        if !config_path.exists() {
            return Err(Error::MalformedArchive(format!(
                "manifest.json references missing config {}",
                config_name
            )));
        }
        let config: Value = read_json_file(&config_path)?;

        Ok(Some(Self {
            manifest_path,
            config_path,
            manifest,
            config,
        }))
    }

    /// stream sha-256 over every surviving layer tar, history order
    pub fn layer_digests(archive: &ImageArchive) -> Result<Vec<LayerDigest>> {
        let mut digests = Vec::new();
        for layer_id in archive.chain() {
            let layer = match archive.get(&layer_id) {
                Some(layer) if layer.has_tar() => layer,
                _ => continue,
            };
            let mut file = File::open(&layer.tar_path).with_path(&layer.tar_path)?;
            let mut hasher = Sha256::new();
            io::copy(&mut file, &mut hasher).with_path(&layer.tar_path)?;
            digests.push(LayerDigest {
                tar_path: format!("{}/{}", layer_id, TAR_FILE),
                digest: hex::encode(hasher.finalize()),
                id: layer_id,
            });
        }
        Ok(digests)
    }

    /// rewrite the layer list, optional repo tag, `rootfs.diff_ids` and
    /// `history`
    pub fn update(&mut self, digests: &[LayerDigest], repo_tag: Option<&str>) -> Result<()> {
        debug!("regenerating manifest for {} layers", digests.len());

        let entry = match self.manifest.get_mut(0) {
            Some(entry) if entry.is_object() => entry,
            _ => {
                return Err(Error::MalformedArchive(
                    "manifest.json has no image entry".to_string(),
                ))
            }
        };
        entry["Layers"] = Value::Array(
            digests
                .iter()
                .map(|d| Value::String(d.tar_path.clone()))
                .collect(),
        );
        if let Some(tag) = repo_tag {
            entry["RepoTags"] = json!([tag]);
        }

        let diff_ids: Vec<Value> = digests
            .iter()
            .map(|d| Value::String(format!("sha256:{}", d.digest)))
            .collect();
        match self.config.get_mut("rootfs") {
            Some(rootfs) if rootfs.is_object() => {
                rootfs["diff_ids"] = Value::Array(diff_ids);
            }
            _ => {
                return Err(Error::MalformedArchive(
                    "image config has no rootfs object".to_string(),
                ))
            }
        }
        self.config["history"] = json!([]);

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        write_json_file(&self.manifest_path, &self.manifest)?;
        write_json_file(&self.config_path, &self.config)
    }

    pub fn manifest(&self) -> &Value {
        &self.manifest
    }

    pub fn config(&self) -> &Value {
        &self.config
    }
}
