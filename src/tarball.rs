//! streaming tar codec for the staging directory
//!
//! extraction preserves permissions, mtimes, xattrs and (when running as
//! root) ownership, with overwrite semantics; archiving walks directories in
//! sorted order so packing the same tree twice yields identical bytes.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use log::warn;
use nix::unistd::Uid;
use tar::{Archive, Builder, EntryType};

use crate::cancel::CancelToken;
use crate::error::{IoResultExt, Result};

/// extract a tar stream into `dest`
///
/// entries named `.`, `..` or `./` are skipped; everything else (regular
/// files, directories, symlinks, hardlinks, device nodes) is passed through
/// to the extractor. directory mtimes are applied after all entries, so
/// extracting children does not disturb them.
pub fn unpack<R: Read>(reader: R, dest: &Path, cancel: CancelToken) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(true);
    archive.set_preserve_ownerships(Uid::effective().is_root());

    let mut dir_mtimes: Vec<(PathBuf, u64)> = Vec::new();

    for entry in archive.entries().with_path(dest)? {
        cancel.check()?;
        let mut entry = entry.with_path(dest)?;

        let raw = entry.path_bytes().into_owned();
        if raw == b"." || raw == b".." || raw == b"./" {
            continue;
        }

        let is_dir = entry.header().entry_type() == EntryType::Directory;
        let mtime = entry.header().mtime().unwrap_or(0);
        let rel = entry.path().with_path(dest)?.into_owned();

        if !entry.unpack_in(dest).with_path(dest)? {
            warn!(
                "skipped archive entry escaping the destination: {}",
                String::from_utf8_lossy(&raw)
            );
            continue;
        }

        if is_dir {
            dir_mtimes.push((dest.join(rel), mtime));
        }
    }

    for (path, mtime) in dir_mtimes {
        let time = FileTime::from_unix_time(mtime as i64, 0);
        filetime::set_file_mtime(&path, time).with_path(&path)?;
    }

    Ok(())
}

/// archive the contents of `dir` (not the directory itself) to `writer`
pub fn pack<W: Write>(dir: &Path, writer: W, cancel: CancelToken) -> Result<W> {
    let mut builder = Builder::new(writer);
    builder.follow_symlinks(false);
    append_tree(&mut builder, dir, Path::new(""), cancel)?;
    builder.into_inner().with_path(dir)
}

/// archive the contents of `dir` into a tar file at `dest`
pub fn pack_to_file(dir: &Path, dest: &Path, cancel: CancelToken) -> Result<()> {
    let file = File::create(dest).with_path(dest)?;
    pack(dir, file, cancel)?;
    Ok(())
}

fn append_tree<W: Write>(
    builder: &mut Builder<W>,
    dir: &Path,
    prefix: &Path,
    cancel: CancelToken,
) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_path(dir)?
        .collect::<std::io::Result<Vec<_>>>()
        .with_path(dir)?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        cancel.check()?;
        let path = entry.path();
        let name = prefix.join(entry.file_name());
        let file_type = entry.file_type().with_path(&path)?;

        builder
            .append_path_with_name(&path, &name)
            .with_path(&path)?;

        if file_type.is_dir() {
            append_tree(builder, &path, &name, cancel)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::tempdir;

    fn cancel() -> CancelToken {
        CancelToken::new()
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("file.txt"), "content").unwrap();
        fs::write(source.join("sub/inner.txt"), "inner").unwrap();
        symlink("file.txt", source.join("link")).unwrap();
        fs::set_permissions(source.join("file.txt"), fs::Permissions::from_mode(0o640)).unwrap();

        let bytes = pack(&source, Vec::new(), cancel()).unwrap();

        let dest = dir.path().join("dest");
        fs::create_dir(&dest).unwrap();
        unpack(Cursor::new(bytes), &dest, cancel()).unwrap();

        assert_eq!(fs::read_to_string(dest.join("file.txt")).unwrap(), "content");
        assert_eq!(fs::read_to_string(dest.join("sub/inner.txt")).unwrap(), "inner");
        assert_eq!(
            fs::read_link(dest.join("link")).unwrap(),
            Path::new("file.txt")
        );
        let mode = fs::metadata(dest.join("file.txt")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_pack_is_deterministic() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir_all(source.join("b")).unwrap();
        fs::write(source.join("b/z.txt"), "z").unwrap();
        fs::write(source.join("a.txt"), "a").unwrap();
        fs::write(source.join("c.txt"), "c").unwrap();

        let first = pack(&source, Vec::new(), cancel()).unwrap();
        let second = pack(&source, Vec::new(), cancel()).unwrap();
        assert_eq!(first, second);
    }

    // the tree a layer tar expands to must repack to identical bytes, or
    // repeated squashes would churn digests
    #[test]
    fn test_extract_repack_round_trip_is_stable() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("sub/inner.txt"), "inner").unwrap();
        fs::write(source.join("top.txt"), "top").unwrap();

        // whole-second mtimes, parents last so child writes don't disturb them
        let stamp = FileTime::from_unix_time(1_400_000_000, 0);
        filetime::set_file_mtime(source.join("sub/inner.txt"), stamp).unwrap();
        filetime::set_file_mtime(source.join("top.txt"), stamp).unwrap();
        filetime::set_file_mtime(source.join("sub"), stamp).unwrap();

        let bytes = pack(&source, Vec::new(), cancel()).unwrap();

        let dest = dir.path().join("dest");
        fs::create_dir(&dest).unwrap();
        unpack(Cursor::new(bytes.clone()), &dest, cancel()).unwrap();

        let repacked = pack(&dest, Vec::new(), cancel()).unwrap();
        assert_eq!(bytes, repacked);
    }

    #[test]
    fn test_unpack_skips_dot_entries() {
        let mut builder = Builder::new(Vec::new());
        for name in [".", "./"] {
            let mut header = tar::Header::new_ustar();
            header.set_path(name).unwrap();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_uid(0);
            header.set_gid(0);
            header.set_size(0);
            header.set_cksum();
            builder.append(&header, std::io::empty()).unwrap();
        }
        let mut header = tar::Header::new_ustar();
        header.set_path("real.txt").unwrap();
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(4);
        header.set_cksum();
        builder.append(&header, &b"data"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let dir = tempdir().unwrap();
        unpack(Cursor::new(bytes), dir.path(), cancel()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("real.txt")).unwrap(), "data");
    }

    #[test]
    fn test_unpack_overwrites_existing() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file.txt"), "new").unwrap();
        let bytes = pack(&source, Vec::new(), cancel()).unwrap();

        let dest = dir.path().join("dest");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("file.txt"), "old").unwrap();
        unpack(Cursor::new(bytes), &dest, cancel()).unwrap();
        assert_eq!(fs::read_to_string(dest.join("file.txt")).unwrap(), "new");
    }

    #[test]
    fn test_pack_to_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file.txt"), "content").unwrap();

        let tar_path = dir.path().join("out.tar");
        pack_to_file(&source, &tar_path, cancel()).unwrap();
        assert!(tar_path.is_file());

        let dest = dir.path().join("dest");
        fs::create_dir(&dest).unwrap();
        unpack(File::open(&tar_path).unwrap(), &dest, cancel()).unwrap();
        assert_eq!(fs::read_to_string(dest.join("file.txt")).unwrap(), "content");
    }
}
