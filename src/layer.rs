use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::{IoResultExt, Result};
use crate::metadata::{self, LayerConfig};
use crate::tarball;

pub const CONFIG_FILE: &str = "json";
pub const VERSION_FILE: &str = "VERSION";
pub const TAR_FILE: &str = "layer.tar";
pub const UNPACKED_DIR: &str = "layer";

const VERSION: &str = "1.0";

/// one exported layer inside the staging directory
///
/// owns its metadata and the on-disk files under `<staging>/<id>/`
#[derive(Debug)]
pub struct Layer {
    pub path: PathBuf,
    pub config_path: PathBuf,
    pub version_path: PathBuf,
    pub tar_path: PathBuf,
    pub unpacked_path: PathBuf,
    pub config: LayerConfig,
}

impl Layer {
    /// layer rooted at `<staging>/<config.id>`
    pub fn new(staging: &Path, config: LayerConfig) -> Self {
        Self::from_parts(staging.join(&config.id), config)
    }

    fn from_parts(path: PathBuf, config: LayerConfig) -> Self {
        Self {
            config_path: path.join(CONFIG_FILE),
            version_path: path.join(VERSION_FILE),
            tar_path: path.join(TAR_FILE),
            unpacked_path: path.join(UNPACKED_DIR),
            path,
            config,
        }
    }

    /// load a layer from its staging subdirectory
    pub fn load(path: &Path) -> Result<Self> {
        let config_path = path.join(CONFIG_FILE);
        let mut config: LayerConfig = metadata::read_json_file(&config_path)?;
        config.normalize();
        Ok(Self::from_parts(path.to_path_buf(), config))
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// the layer's recorded build command
    pub fn command(&self) -> String {
        self.config.command()
    }

    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.path).with_path(&self.path)
    }

    pub fn write_config(&self) -> Result<()> {
        metadata::write_json_file(&self.config_path, &self.config)
    }

    pub fn write_version(&self) -> Result<()> {
        fs::write(&self.version_path, VERSION).with_path(&self.version_path)
    }

    pub fn has_tar(&self) -> bool {
        self.tar_path.is_file()
    }

    /// size of the packed tar, if present
    pub fn tar_size(&self) -> Option<u64> {
        fs::metadata(&self.tar_path).ok().map(|m| m.len())
    }

    /// unpack `layer.tar` into the unpacked subdirectory
    pub fn extract(&self, cancel: CancelToken) -> Result<()> {
        fs::create_dir_all(&self.unpacked_path).with_path(&self.unpacked_path)?;
        let file = File::open(&self.tar_path).with_path(&self.tar_path)?;
        tarball::unpack(file, &self.unpacked_path, cancel)
    }

    /// pack the contents of `dir` into this layer's tar
    pub fn pack_tar_from(&self, dir: &Path, cancel: CancelToken) -> Result<()> {
        tarball::pack_to_file(dir, &self.tar_path, cancel)
    }

    pub fn remove_unpacked(&self) -> Result<()> {
        if self.unpacked_path.exists() {
            fs::remove_dir_all(&self.unpacked_path).with_path(&self.unpacked_path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cancel() -> CancelToken {
        CancelToken::new()
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempdir().unwrap();
        let layer = Layer::new(dir.path(), LayerConfig::new("aa".repeat(32), "", "base"));
        layer.create_dirs().unwrap();
        layer.write_config().unwrap();
        layer.write_version().unwrap();

        assert_eq!(
            fs::read_to_string(&layer.version_path).unwrap(),
            "1.0"
        );

        let loaded = Layer::load(&layer.path).unwrap();
        assert_eq!(loaded.id(), "aa".repeat(32));
        assert_eq!(loaded.config.comment, "base");
        assert_eq!(loaded.tar_path, layer.tar_path);
    }

    #[test]
    fn test_extract_and_repack() {
        let dir = tempdir().unwrap();
        let layer = Layer::new(dir.path(), LayerConfig::new("bb".repeat(32), "", ""));
        layer.create_dirs().unwrap();

        // build the packed tar from a scratch tree
        let content = dir.path().join("content");
        fs::create_dir_all(content.join("etc")).unwrap();
        fs::write(content.join("etc/hostname"), "box").unwrap();
        layer.pack_tar_from(&content, cancel()).unwrap();
        assert!(layer.has_tar());
        assert!(layer.tar_size().unwrap() > 0);

        layer.extract(cancel()).unwrap();
        assert_eq!(
            fs::read_to_string(layer.unpacked_path.join("etc/hostname")).unwrap(),
            "box"
        );

        layer.remove_unpacked().unwrap();
        assert!(!layer.unpacked_path.exists());
        // removing again is fine
        layer.remove_unpacked().unwrap();
    }

    #[test]
    fn test_command_joins_cmd() {
        let dir = tempdir().unwrap();
        let mut config = LayerConfig::new("cc".repeat(32), "", "");
        config.container_config_mut().cmd =
            Some(vec!["/bin/sh".into(), "-c".into(), "#(nop) ENV a=b".into()]);
        let layer = Layer::new(dir.path(), config);
        assert_eq!(layer.command(), "/bin/sh -c #(nop) ENV a=b");
    }
}
