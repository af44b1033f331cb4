//! classification of layer history and squash start selection

use crate::archive::ImageArchive;
use crate::error::{Error, Result};

/// marker left by a previous squash run
pub const SQUASH_MARKER: &str = "#(squash)";
/// marker recorded for a base image layer
pub const FROM_MARKER: &str = "#(nop) ADD file";

const NOOP_MARKER: &str = "#(nop)";

/// what a layer's recorded build command says about it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    /// previous squash marker; preferred squash start
    PriorSquash,
    /// base-image marker; candidate squash start
    From,
    /// metadata-only build step; survives squashing
    MetadataNoop,
    /// filesystem-changing layer; collapsed inside the squash suffix
    Content,
}

pub fn classify(command: &str) -> LayerKind {
    if command.contains(SQUASH_MARKER) {
        LayerKind::PriorSquash
    } else if command.contains(FROM_MARKER) {
        LayerKind::From
    } else if command.contains(NOOP_MARKER)
        && !(command.contains("ADD") || command.contains("COPY"))
    {
        LayerKind::MetadataNoop
    } else {
        LayerKind::Content
    }
}

/// literal `--from` token meaning the root layer
pub const ROOT_TOKEN: &str = "root";

/// how the squash start layer is chosen
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StartPolicy {
    /// first squash marker, else first FROM marker, else the root
    #[default]
    First,
    /// last squash marker (advanced one child, so the squash starts below
    /// the previous one), else last FROM marker, else the root
    Last,
    /// operator-supplied id prefix, or [`ROOT_TOKEN`]
    Explicit(String),
}

/// resolve the squash start layer id under the given policy
pub fn select_start(archive: &ImageArchive, policy: &StartPolicy) -> Result<String> {
    let root = || {
        archive
            .root()
            .map(|layer| layer.id().to_string())
            .ok_or_else(|| Error::MalformedArchive("no root layer".to_string()))
    };

    match policy {
        StartPolicy::First => match first_of(archive, LayerKind::PriorSquash)
            .or_else(|| first_of(archive, LayerKind::From))
        {
            Some(hit) => Ok(hit),
            None => root(),
        },

        StartPolicy::Last => {
            if let Some(hit) = last_of(archive, LayerKind::PriorSquash) {
                // squash below the previous marker when anything is there
                Ok(archive
                    .child_of(&hit)
                    .map(|layer| layer.id().to_string())
                    .unwrap_or(hit))
            } else if let Some(hit) = last_of(archive, LayerKind::From) {
                Ok(hit)
            } else {
                root()
            }
        }

        StartPolicy::Explicit(selector) => {
            if selector == ROOT_TOKEN {
                return root();
            }
            match archive.get_by_prefix(selector)? {
                Some(layer) => Ok(layer.id().to_string()),
                None => Err(Error::UnknownLayer(selector.clone())),
            }
        }
    }
}

fn first_of(archive: &ImageArchive, kind: LayerKind) -> Option<String> {
    archive
        .chain()
        .into_iter()
        .find(|layer_id| layer_kind(archive, layer_id) == kind)
}

fn last_of(archive: &ImageArchive, kind: LayerKind) -> Option<String> {
    archive
        .chain()
        .into_iter()
        .filter(|layer_id| layer_kind(archive, layer_id) == kind)
        .last()
}

fn layer_kind(archive: &ImageArchive, layer_id: &str) -> LayerKind {
    archive
        .get(layer_id)
        .map(|layer| classify(&layer.command()))
        .unwrap_or(LayerKind::Content)
}
