// Host filesystem helpers for the local runtime: mapping container paths
// into a container's root and copying volume contents.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tasker_sdk::PathUtil;
use walkdir::WalkDir;

/// Host location of `container_path` inside a container rooted at `root`.
///
/// Relative paths are taken from the container's root. `..` never escapes it.
pub(crate) fn host_path(root: &Path, container_path: &str) -> PathBuf {
    let rooted = PathUtil::clean(&format!("/{container_path}"));
    let relative = rooted.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Copy the contents of `from` into `to`, creating `to` if needed.
pub(crate) async fn copy_dir(from: PathBuf, to: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || copy_dir_blocking(&from, &to))
        .await
        .context("copy task panicked")?
}

/// Replace `to` with a copy of `from`.
pub(crate) async fn replace_dir(from: PathBuf, to: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        if to.exists() {
            std::fs::remove_dir_all(&to)
                .with_context(|| format!("failed to clear {}", to.display()))?;
        }
        copy_dir_blocking(&from, &to)
    })
    .await
    .context("copy task panicked")?
}

fn copy_dir_blocking(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).with_context(|| format!("failed to create {}", to.display()))?;

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", from.display()))?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    let link = std::fs::read_link(source)?;
    if target.symlink_metadata().is_ok() {
        std::fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(&link, target)
        .with_context(|| format!("failed to link {}", target.display()))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    std::fs::copy(source, target)
        .map(|_| ())
        .with_context(|| format!("failed to copy {}", source.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_path_stays_inside_root() {
        let root = Path::new("/work/c1");
        assert_eq!(host_path(root, "some-artifact-root/out/"), root.join("some-artifact-root/out"));
        assert_eq!(host_path(root, "/some/dir"), root.join("some/dir"));
        assert_eq!(host_path(root, "../../etc"), root.join("etc"));
        assert_eq!(host_path(root, "/"), root.to_path_buf());
    }

    #[tokio::test]
    async fn copies_nested_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("a/b")).unwrap();
        std::fs::write(src.path().join("a/b/file"), "contents").unwrap();
        std::fs::write(src.path().join("top"), "top").unwrap();

        let target = dst.path().join("copy");
        copy_dir(src.path().to_path_buf(), target.clone()).await.unwrap();

        assert_eq!(std::fs::read_to_string(target.join("a/b/file")).unwrap(), "contents");
        assert_eq!(std::fs::read_to_string(target.join("top")).unwrap(), "top");
    }

    #[tokio::test]
    async fn replace_drops_stale_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("fresh"), "new").unwrap();
        std::fs::write(dst.path().join("stale"), "old").unwrap();

        replace_dir(src.path().to_path_buf(), dst.path().to_path_buf()).await.unwrap();

        assert!(dst.path().join("fresh").exists());
        assert!(!dst.path().join("stale").exists());
    }
}
