//! final image assembly: tag injection, manifest regeneration, output pack

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use log::debug;

use crate::archive::ImageArchive;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::id;
use crate::manifest::Manifest;
use crate::tarball;

/// repository name and tag for the squashed image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageTag {
    pub repo: String,
    pub tag: String,
}

impl FromStr for ImageTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (repo, tag) = s
            .split_once(':')
            .ok_or_else(|| Error::MalformedTag(s.to_string()))?;
        if repo.is_empty() || tag.is_empty() {
            return Err(Error::MalformedTag(s.to_string()));
        }
        Ok(Self {
            repo: repo.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo, self.tag)
    }
}

/// write the mutated staging directory back out as an image tar stream
pub fn write_image<W: Write>(
    archive: &mut ImageArchive,
    tag: Option<&ImageTag>,
    writer: W,
    cancel: CancelToken,
) -> Result<W> {
    if let Some(tag) = tag {
        let last = archive
            .last_child()
            .ok_or_else(|| Error::MalformedArchive("no layers to tag".to_string()))?
            .id()
            .to_string();
        debug!("tagging {} as {}", id::short(&last), tag);
        archive.set_tag(&tag.repo, &tag.tag, &last);
        archive.write_repositories()?;
    }

    if let Some(mut manifest) = Manifest::load(archive.path())? {
        let digests = Manifest::layer_digests(archive)?;
        let repo_tag = tag.map(ToString::to_string);
        manifest.update(&digests, repo_tag.as_deref())?;
        manifest.save()?;
    }

    debug!("writing image archive");
    tarball::pack(archive.path(), writer, cancel)
}
