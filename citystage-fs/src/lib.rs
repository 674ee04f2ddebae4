//! Capability-based filesystem helpers for the private scratch area.
//!
//! Every staging run that uses the embedded scratch database gets its own
//! directory below a configured local-cache root. These helpers create that
//! directory exactly once and remove the whole tree again at teardown,
//! resolving ambient paths through `cap-std` so absolute and relative roots
//! behave the same way.
#![forbid(unsafe_code)]

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;
use std::path::Component;

/// Create `root/name` as a new, empty directory.
///
/// Missing ancestors of `root` are created. The leaf must not already exist,
/// so two runs can never share a scratch directory by accident. `name` must
/// be a single normal path component.
///
/// # Errors
/// Returns the underlying I/O error, `AlreadyExists` when the leaf is
/// present, or `InvalidInput` when `name` is not a plain component.
pub fn create_private_dir(root: &Utf8Path, name: &str) -> io::Result<Utf8PathBuf> {
    let mut components = Utf8Path::new(name).components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Utf8Component::Normal(_)), None)
    ) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("scratch directory name {name:?} must be a single path component"),
        ));
    }

    let root_dir = open_or_create_dir(root)?;
    root_dir.create_dir(name)?;
    Ok(root.join(name))
}

/// Recursively delete `path` and everything below it.
///
/// A path that is already gone counts as removed.
///
/// # Errors
/// Returns the I/O error raised while opening the parent or deleting the
/// tree.
pub fn remove_dir_tree(path: &Utf8Path) -> io::Result<()> {
    let (parent, name) = open_parent_and_name(path)?;
    match parent.remove_dir_all(name.as_str()) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Return whether `path` exists and is a directory.
#[cfg(test)]
fn dir_exists(path: &Utf8Path) -> io::Result<bool> {
    let (parent, name) = match open_parent_and_name(path) {
        Ok(found) => found,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match parent.metadata(name.as_str()) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn open_or_create_dir(path: &Utf8Path) -> io::Result<fs_utf8::Dir> {
    let (base_dir, relative) = base_dir_and_relative(path)?;
    if relative.as_os_str().is_empty() {
        return Ok(base_dir);
    }
    base_dir.create_dir_all(&relative)?;
    base_dir.open_dir(&relative)
}

fn open_parent_and_name(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} has no final component")))?
        .to_owned();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, name))
}

/// Split a path into an ambient base directory and the relative remainder.
///
/// Absolute paths resolve from the filesystem root (or the drive/UNC prefix
/// on Windows); relative paths resolve from the current directory.
///
/// # Errors
/// Returns an error when the base cannot be opened or the path is not UTF-8.
pub fn base_dir_and_relative(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();

    let (base, relative) = match std_path.components().next() {
        Some(Component::Prefix(prefix)) => {
            let prefix_str = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            let base = Utf8PathBuf::from(prefix_str).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .or_else(|_| std_path.strip_prefix(prefix.as_os_str()))
                .map_err(|_| io::Error::other("failed to strip prefix from path"))?
                .to_path_buf();
            (base, relative)
        }
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_path_buf();
            (base, relative)
        }
        _ => (Utf8PathBuf::from("."), std_path.to_path_buf()),
    };

    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    let relative =
        Utf8PathBuf::from_path_buf(relative).map_err(|_| io::Error::other("non-UTF-8 path"))?;
    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn root() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, path)
    }

    #[rstest]
    fn creates_directory_under_missing_root(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        let nested = base.join("cache/nested");

        let created = create_private_dir(&nested, "run-1").expect("create scratch dir");

        assert_eq!(created, nested.join("run-1"));
        assert!(dir_exists(&created).expect("inspect scratch dir"));
    }

    #[rstest]
    fn refuses_to_reuse_existing_directory(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        create_private_dir(&base, "run-1").expect("first create");

        let err = create_private_dir(&base, "run-1").expect_err("second create should fail");
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("..")]
    fn rejects_non_component_names(root: (TempDir, Utf8PathBuf), #[case] name: &str) {
        let (_guard, base) = root;
        let err = create_private_dir(&base, name).expect_err("name should be rejected");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[rstest]
    fn removes_populated_tree(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        let created = create_private_dir(&base, "run-2").expect("create scratch dir");
        std::fs::create_dir_all(created.join("deep/er")).expect("populate tree");
        std::fs::write(created.join("deep/er/scratch.db"), b"x").expect("write file");

        remove_dir_tree(&created).expect("remove tree");

        assert!(!dir_exists(&created).expect("inspect removed dir"));
    }

    #[rstest]
    fn removing_missing_tree_is_not_an_error(root: (TempDir, Utf8PathBuf)) {
        let (_guard, base) = root;
        remove_dir_tree(&base.join("never-created")).expect("missing tree is fine");
    }
}
