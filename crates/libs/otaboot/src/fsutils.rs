//! Filesystem utilities.

use std::fs::{self, DirBuilder, File};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::Path;

use nix::unistd::getuid;
use reportify::{ErrorExt, Report, ResultExt};

reportify::new_whatever_type! {
    FsError
}

pub type FsResult<T> = Result<T, Report<FsError>>;

/// Create a directory only accessible by the current user.
///
/// The parent directory must exist. An existing directory is accepted if it is owned by
/// the current user and neither the group nor others have any permissions on it.
pub fn create_secure_directory(path: &Path) -> FsResult<()> {
    match DirBuilder::new().mode(0o700).create(path) {
        Ok(()) => return Ok(()),
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {}
        Err(error) => {
            return Err(error
                .whatever("unable to create directory")
                .with_context(format!("path: {path:?}")))
        }
    }
    let metadata = fs::metadata(path)
        .whatever("unable to read directory metadata")
        .with_info(|_| format!("path: {path:?}"))?;
    ensure!(metadata.is_dir(), "{path:?} is not a directory");
    ensure!(
        metadata.mode() & 0o777 == 0o700,
        "{path:?} has insecure permissions {:o}",
        metadata.mode() & 0o777
    );
    ensure!(
        metadata.uid() == getuid().as_raw(),
        "{path:?} is not owned by the current user"
    );
    Ok(())
}

/// Create an empty file or truncate an existing one.
pub fn write_empty_file(path: &Path) -> FsResult<()> {
    fs::write(path, "")
        .whatever("unable to write file")
        .with_info(|_| format!("path: {path:?}"))
}

/// Remove a file, succeeding if it does not exist.
pub fn remove_file_if_exists(path: &Path) -> FsResult<()> {
    fs::remove_file(path).or_else(|error| match error.kind() {
        io::ErrorKind::NotFound => Ok(()),
        _ => Err(error
            .whatever("unable to remove file")
            .with_context(format!("path: {path:?}"))),
    })
}

/// Atomically replace the contents of a file.
///
/// The contents are written to a temporary file next to the target, synchronized, and
/// renamed over the target. The parent directory is synchronized afterwards to persist
/// the rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> FsResult<()> {
    let Some(file_name) = path.file_name() else {
        reportify::bail!("{path:?} does not name a file");
    };
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut new_name = file_name.to_owned();
    new_name.push(".new");
    let new_path = parent.join(new_name);
    let mut new_file = File::create(&new_path)
        .whatever("unable to create temporary file")
        .with_info(|_| format!("path: {new_path:?}"))?;
    new_file
        .write_all(contents)
        .whatever("unable to write temporary file")?;
    new_file
        .sync_all()
        .whatever("unable to synchronize temporary file")?;
    drop(new_file);
    fs::rename(&new_path, path)
        .whatever("unable to rename temporary file")
        .with_info(|_| format!("path: {path:?}"))?;
    sync_directory(parent)
}

/// Synchronize a directory such that changes to its entries are persisted.
pub fn sync_directory(path: &Path) -> FsResult<()> {
    File::open(path)
        .and_then(|directory| directory.sync_all())
        .whatever("unable to synchronize directory")
        .with_info(|_| format!("path: {path:?}"))
}
