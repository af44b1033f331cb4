//! in-memory graph of exported layers
//!
//! nodes are keyed by layer id; edges come from parent pointers. a derived
//! `parent -> child` index is rebuilt after every structural mutation so the
//! graph invariants (single root, one child per parent, resolving parents)
//! are re-checked each time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;

use crate::cancel::CancelToken;
use crate::error::{Error, IoResultExt, Result};
use crate::id;
use crate::layer::Layer;
use crate::metadata::{self, LayerConfig, Repositories};

pub const REPOSITORIES_FILE: &str = "repositories";

/// comment stamped on synthesized squash layers
const SQUASH_COMMENT: &str = "squashed w/ imgsquash";

/// the layer graph of one exported image
pub struct ImageArchive {
    path: PathBuf,
    entries: BTreeMap<String, Layer>,
    // parent id ("" for the root) -> child id
    children: BTreeMap<String, String>,
    repositories: Repositories,
}

impl ImageArchive {
    /// load the graph from an expanded staging directory
    pub fn load(path: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for dir_entry in fs::read_dir(path).with_path(path)? {
            let dir_entry = dir_entry.with_path(path)?;
            if !dir_entry.file_type().with_path(path)?.is_dir() {
                continue;
            }
            let layer = Layer::load(&dir_entry.path())?;
            if layer.id().is_empty() {
                return Err(Error::MalformedArchive(format!(
                    "layer at {} has no id",
                    dir_entry.path().display()
                )));
            }
            entries.insert(layer.id().to_string(), layer);
        }
        if entries.is_empty() {
            return Err(Error::MalformedArchive("no layers found".to_string()));
        }

        let repositories = metadata::read_repositories(&path.join(REPOSITORIES_FILE))?;
        let images = metadata::distinct_tag_targets(&repositories);
        if images > 1 {
            return Err(Error::MultiImageArchive(images));
        }

        let mut archive = Self {
            path: path.to_path_buf(),
            entries,
            children: BTreeMap::new(),
            repositories,
        };
        archive.rebuild_index()?;

        debug!("loaded image with {} layers", archive.entries.len());
        for (repo, tags) in &archive.repositories {
            debug!("  - {} ({} tags)", repo, tags.len());
        }
        Ok(archive)
    }

    fn rebuild_index(&mut self) -> Result<()> {
        let mut children = BTreeMap::new();
        for layer in self.entries.values() {
            let parent = layer.config.parent.clone();
            if !parent.is_empty() && !self.entries.contains_key(&parent) {
                return Err(Error::MalformedArchive(format!(
                    "layer {} names missing parent {}",
                    id::short(layer.id()),
                    id::short(&parent)
                )));
            }
            if children
                .insert(parent.clone(), layer.id().to_string())
                .is_some()
            {
                if parent.is_empty() {
                    return Err(Error::MalformedArchive(
                        "more than one root layer".to_string(),
                    ));
                }
                return Err(Error::MultiBranch {
                    parent: id::short(&parent).to_string(),
                });
            }
        }
        self.children = children;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, layer_id: &str) -> Option<&Layer> {
        self.entries.get(layer_id)
    }

    /// the unique layer with an empty parent
    pub fn root(&self) -> Option<&Layer> {
        self.child_of("")
    }

    /// the unique child of `layer_id`, if any
    pub fn child_of(&self, layer_id: &str) -> Option<&Layer> {
        self.children
            .get(layer_id)
            .and_then(|child| self.entries.get(child))
    }

    /// the end of the chain
    pub fn last_child(&self) -> Option<&Layer> {
        self.chain().last().and_then(|layer_id| self.get(layer_id))
    }

    /// layer ids in history order, root first
    pub fn chain(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut current = self.children.get("").cloned();
        while let Some(layer_id) = current {
            current = self.children.get(&layer_id).cloned();
            order.push(layer_id);
        }
        order
    }

    /// the unique layer whose id begins with `prefix`, or none
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Option<&Layer>> {
        let matches: Vec<&Layer> = self
            .entries
            .iter()
            .filter(|(layer_id, _)| layer_id.starts_with(prefix))
            .map(|(_, layer)| layer)
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            n => Err(Error::AmbiguousPrefix {
                prefix: prefix.to_string(),
                matches: n,
            }),
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    /// insert a fresh squash-marker layer between `parent_id` and its child
    pub fn insert_after(&mut self, parent_id: &str) -> Result<String> {
        let child_id = self
            .children
            .get(parent_id)
            .cloned()
            .ok_or_else(|| Error::NoChild(id::short(parent_id).to_string()))?;

        let new_id = id::generate();
        let mut config = LayerConfig::new(new_id.clone(), parent_id, SQUASH_COMMENT);
        config.container_config_mut().cmd = Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("#(squash) from {}", id::short(parent_id)),
        ]);

        let layer = Layer::new(&self.path, config);
        layer.create_dirs()?;
        layer.write_config()?;
        layer.write_version()?;

        let child = self.entries.get_mut(&child_id).expect("indexed child");
        child.config.parent = new_id.clone();
        child.write_config()?;

        self.entries.insert(new_id.clone(), layer);
        self.rebuild_index()?;

        debug!(
            "inserted layer {} after {}",
            id::short(&new_id),
            id::short(parent_id)
        );
        Ok(new_id)
    }

    /// swap `old_id` for a fresh id, moving its files and updating `created`
    pub fn replace(&mut self, old_id: &str) -> Result<String> {
        let old = self
            .entries
            .get(old_id)
            .ok_or_else(|| Error::UnknownLayer(id::short(old_id).to_string()))?;

        let new_id = id::generate();
        debug!(
            "  - replacing {} with new layer {} ({})",
            id::short(old_id),
            id::short(&new_id),
            truncate_command(&old.command(), 50)
        );

        let mut config = old.config.clone();
        config.id = new_id.clone();
        config.created = Utc::now();

        let layer = Layer::new(&self.path, config);
        layer.create_dirs()?;
        layer.write_config()?;
        rename_if_exists(&old.unpacked_path, &layer.unpacked_path)?;
        rename_if_exists(&old.tar_path, &layer.tar_path)?;
        rename_if_exists(&old.version_path, &layer.version_path)?;

        if let Some(child_id) = self.children.get(old_id).cloned() {
            let child = self.entries.get_mut(&child_id).expect("indexed child");
            child.config.parent = new_id.clone();
            child.write_config()?;
        }

        let old = self.entries.remove(old_id).expect("looked up above");
        fs::remove_dir_all(&old.path).with_path(&old.path)?;

        self.entries.insert(new_id.clone(), layer);
        self.rebuild_index()?;
        Ok(new_id)
    }

    /// remove a layer, reparenting its child onto its parent
    pub fn delete(&mut self, layer_id: &str) -> Result<()> {
        let layer = self
            .entries
            .remove(layer_id)
            .ok_or_else(|| Error::UnknownLayer(id::short(layer_id).to_string()))?;

        if let Some(child_id) = self.children.get(layer_id).cloned() {
            let child = self.entries.get_mut(&child_id).expect("indexed child");
            child.config.parent = layer.config.parent.clone();
            child.write_config()?;
        }

        fs::remove_dir_all(&layer.path).with_path(&layer.path)?;
        self.rebuild_index()?;
        Ok(())
    }

    /// record `repositories[repo][tag] = layer_id`
    pub fn set_tag(&mut self, repo: &str, tag: &str, layer_id: &str) {
        self.repositories
            .entry(repo.to_string())
            .or_default()
            .insert(tag.to_string(), layer_id.to_string());
    }

    pub fn write_repositories(&self) -> Result<()> {
        metadata::write_json_file(&self.path.join(REPOSITORIES_FILE), &self.repositories)
    }

    /// unpack every layer's packed tar into its unpacked subdirectory
    ///
    /// layers without a packed tar are skipped; extraction failures are fatal
    pub fn extract_layers(&self, cancel: CancelToken) -> Result<()> {
        debug!("extracting layers");
        for layer_id in self.chain() {
            let layer = &self.entries[&layer_id];
            if !layer.has_tar() {
                continue;
            }
            debug!("  - {}", layer.tar_path.display());
            layer.extract(cancel)?;
        }
        Ok(())
    }

    pub fn remove_unpacked_layers(&self) -> Result<()> {
        for layer in self.entries.values() {
            layer.remove_unpacked()?;
        }
        Ok(())
    }

    /// dump the chain at debug level: short id, age, command, tar size
    pub fn log_history(&self) {
        let now = Utc::now();
        for layer_id in self.chain() {
            let layer = &self.entries[&layer_id];
            let age = human_duration(now.signed_duration_since(layer.config.created));
            let size = layer
                .tar_size()
                .map(human_size)
                .unwrap_or_else(|| "-".to_string());
            debug!(
                "  - {} {} {} {}",
                id::short(layer.id()),
                age,
                truncate_command(&layer.command(), 60),
                size
            );
        }
    }
}

fn rename_if_exists(from: &Path, to: &Path) -> Result<()> {
    if from.exists() {
        fs::rename(from, to).with_path(from)?;
    }
    Ok(())
}

pub(crate) fn truncate_command(cmd: &str, max: usize) -> String {
    if cmd.chars().count() > max {
        let cut: String = cmd.chars().take(max - 3).collect();
        format!("{}...", cut)
    } else {
        cmd.to_string()
    }
}

fn human_duration(d: chrono::Duration) -> String {
    let seconds = d.num_seconds();
    let minutes = d.num_minutes();
    let hours = d.num_hours();
    if seconds < 1 {
        "Less than a second".to_string()
    } else if seconds < 60 {
        format!("{} seconds", seconds)
    } else if minutes == 1 {
        "About a minute".to_string()
    } else if minutes < 60 {
        format!("{} minutes", minutes)
    } else if hours == 1 {
        "About an hour".to_string()
    } else if hours < 48 {
        format!("{} hours", hours)
    } else if hours < 24 * 7 * 2 {
        format!("{} days", hours / 24)
    } else if hours < 24 * 30 * 3 {
        format!("{} weeks", hours / 24 / 7)
    } else if hours < 24 * 365 * 2 {
        format!("{} months", hours / 24 / 30)
    } else {
        format!("{} years", hours / 24 / 365)
    }
}

fn human_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", size)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
