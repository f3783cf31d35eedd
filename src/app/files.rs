use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Creates `dir` and any missing parents, readable only by the owner.
#[cfg(unix)]
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Replaces the contents of `path`, leaving it readable and writable only by the owner.
#[cfg(unix)]
pub fn write_private_file(path: &Path, body: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(body)?;
    file.sync_all()
}

#[cfg(not(unix))]
pub fn write_private_file(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(body)?;
    file.sync_all()
}

/// Writes `body` next to `path` and renames it into place, so readers never see a partial file.
///
/// A symlinked `path` is written through: the link stays and its target is replaced.
pub fn replace_file(path: &Path, body: &[u8]) -> io::Result<()> {
    let path = resolve_symlink(path)?;
    let path = path.as_path();
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(err) = write_private_file(&tmp_path, body).and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

fn resolve_symlink(path: &Path) -> io::Result<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => match fs::canonicalize(path) {
            Ok(target) => Ok(target),
            // dangling link, create its target
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let target = fs::read_link(path)?;
                Ok(match path.parent() {
                    Some(parent) if target.is_relative() => parent.join(target),
                    _ => target,
                })
            }
            Err(err) => Err(err),
        },
        _ => Ok(path.to_path_buf()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;

    #[test]
    fn replace_file_leaves_no_temporary_behind() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config");
        fs::write(&path, "old")?;

        replace_file(&path, b"new")?;

        assert_eq!(fs::read_to_string(&path)?, "new");
        let entries: Vec<_> = fs::read_dir(dir.path())?.collect::<Result<_, _>>()?;
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn replace_file_writes_through_symlinks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("dotfiles-kubeconfig");
        let link = dir.path().join("config");
        fs::write(&target, "old")?;
        std::os::unix::fs::symlink("dotfiles-kubeconfig", &link)?;

        replace_file(&link, b"new")?;

        assert!(fs::symlink_metadata(&link)?.file_type().is_symlink());
        assert_eq!(fs::read_to_string(&target)?, "new");
        assert_eq!(fs::read_to_string(&link)?, "new");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn replace_file_creates_the_target_of_a_dangling_symlink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("kubeconfig");
        let link = dir.path().join("config");
        std::os::unix::fs::symlink("kubeconfig", &link)?;

        replace_file(&link, b"new")?;

        assert!(fs::symlink_metadata(&link)?.file_type().is_symlink());
        assert_eq!(fs::read_to_string(&target)?, "new");
        Ok(())
    }
}
