//! the squash engine
//!
//! collapses the layer chain from a start layer downward into the start
//! layer's own tar: each suffix layer is extracted into one shared directory
//! in history order, whiteout markers are applied between extractions so
//! later layers observe deletions, then the graph is rewritten (metadata
//! no-op layers survive under fresh ids, everything else is removed).

use std::fs::{self, File};
use std::path::Path;

use log::debug;
use walkdir::WalkDir;

use crate::archive::{truncate_command, ImageArchive};
use crate::cancel::CancelToken;
use crate::error::{Error, IoResultExt, Result};
use crate::history::{classify, LayerKind};
use crate::id;
use crate::tarball;

/// basename prefix marking a deleted sibling
const WHITEOUT_PREFIX: &str = ".wh.";

/// collapse everything from `start` downward into `start`'s tar
pub fn squash(archive: &mut ImageArchive, start: &str, cancel: CancelToken) -> Result<()> {
    debug!("squashing from {}", id::short(start));

    archive.extract_layers(cancel)?;

    // history-ordered suffix, start first
    let mut order = vec![start.to_string()];
    let mut current = archive.child_of(start).map(|layer| layer.id().to_string());
    while let Some(layer_id) = current {
        current = archive.child_of(&layer_id).map(|layer| layer.id().to_string());
        order.push(layer_id);
    }

    let shared = archive
        .get(start)
        .ok_or_else(|| Error::UnknownLayer(id::short(start).to_string()))?
        .unpacked_path
        .clone();
    fs::create_dir_all(&shared).with_path(&shared)?;

    for layer_id in &order {
        cancel.check()?;
        let layer = archive
            .get(layer_id)
            .ok_or_else(|| Error::UnknownLayer(id::short(layer_id).to_string()))?;
        if !layer.has_tar() {
            continue;
        }
        let file = File::open(&layer.tar_path).with_path(&layer.tar_path)?;
        tarball::unpack(file, &shared, cancel)?;

        debug!("  - deleting whiteouts for layer {}", id::short(layer_id));
        prune_whiteouts(&shared)?;
    }

    debug!("  - rewriting child history");
    rewrite_children(archive, start)?;

    let squashed = archive
        .get(start)
        .ok_or_else(|| Error::UnknownLayer(id::short(start).to_string()))?;
    debug!("tarring up squashed layer {}", id::short(start));
    squashed.pack_tar_from(&shared, cancel)?;

    archive.remove_unpacked_layers()?;
    Ok(())
}

/// apply whiteout markers under `root`
///
/// every entry whose basename begins with `.wh.` deletes the like-named
/// sibling (recursively for directories; a missing sibling is fine) and is
/// then removed itself.
fn prune_whiteouts(root: &Path) -> Result<()> {
    // collect before deleting; the walk must not race its own removals
    let mut markers = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(WHITEOUT_PREFIX)
        {
            markers.push(entry.path().to_path_buf());
        }
    }

    for marker in markers {
        let name = match marker.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let stripped = &name[WHITEOUT_PREFIX.len()..];
        if !stripped.is_empty() {
            remove_all(&marker.with_file_name(stripped))?;
        }
        remove_all(&marker)?;
    }
    Ok(())
}

fn remove_all(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).with_path(path),
        Ok(_) => fs::remove_file(path).with_path(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_path(path),
    }
}

/// rewrite the graph below the squash layer: metadata no-ops survive under
/// fresh ids, content layers are dropped
fn rewrite_children(archive: &mut ImageArchive, start: &str) -> Result<()> {
    let mut current = archive.child_of(start).map(|layer| layer.id().to_string());
    while let Some(layer_id) = current {
        let command = archive
            .get(&layer_id)
            .map(|layer| layer.command())
            .unwrap_or_default();

        if classify(&command) == LayerKind::MetadataNoop {
            let new_id = archive.replace(&layer_id)?;
            current = archive.child_of(&new_id).map(|layer| layer.id().to_string());
        } else {
            debug!(
                "  - removing {}. squashed. ({})",
                id::short(&layer_id),
                truncate_command(&command, 50)
            );
            let next = archive.child_of(&layer_id).map(|layer| layer.id().to_string());
            archive.delete(&layer_id)?;
            current = next;
        }
    }
    Ok(())
}
