use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::MoveError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { from: PathBuf, to: PathBuf },
    Unchanged,
}

/// The only seam through which the organizer touches the real filesystem.
pub trait MoveExecutor {
    fn move_file(&self, source: &Path, destination: &Path) -> Result<MoveOutcome, MoveError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsMover;

impl MoveExecutor for FsMover {
    fn move_file(&self, source: &Path, destination: &Path) -> Result<MoveOutcome, MoveError> {
        move_file(source, destination)
    }
}

/// Moves `source` to `destination`, creating missing parent directories.
/// An occupied destination is refused, never overwritten.
pub fn move_file(source: &Path, destination: &Path) -> Result<MoveOutcome, MoveError> {
    if source == destination {
        return Ok(MoveOutcome::Unchanged);
    }
    if fs::symlink_metadata(source).is_err() {
        return Err(MoveError::SourceMissing {
            source_path: source.to_path_buf(),
        });
    }
    if fs::symlink_metadata(destination).is_ok() {
        return Err(MoveError::Conflict {
            destination: destination.to_path_buf(),
        });
    }

    let failure = |err: io::Error| MoveError::Failure {
        source_path: source.to_path_buf(),
        destination: destination.to_path_buf(),
        reason: err.to_string(),
    };

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(failure)?;
    }

    match fs::rename(source, destination) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                source = %source.display(),
                "rename crosses devices, copying instead"
            );
            copy_then_remove(source, destination).map_err(failure)?;
        }
        Err(err) => return Err(failure(err)),
    }

    tracing::info!(from = %source.display(), to = %destination.display(), "moved file");
    Ok(MoveOutcome::Moved {
        from: source.to_path_buf(),
        to: destination.to_path_buf(),
    })
}

fn copy_then_remove(source: &Path, destination: &Path) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;
    if let Err(err) = io::copy(&mut reader, &mut writer) {
        drop(writer);
        let _ = fs::remove_file(destination);
        return Err(err);
    }
    writer.sync_all()?;
    if let Ok(meta) = fs::metadata(source) {
        let _ = fs::set_permissions(destination, meta.permissions());
    }

    if let Err(err) = fs::remove_file(source) {
        let _ = fs::remove_file(destination);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn moves_into_missing_directories() {
        let base = tempfile::tempdir().unwrap();
        let src = base.path().join("notes.txt");
        let dest = base.path().join("docs/2024/notes_2024.txt");
        File::create(&src).unwrap().write_all(b"content").unwrap();

        let outcome = move_file(&src, &dest).unwrap();

        assert_eq!(
            outcome,
            MoveOutcome::Moved {
                from: src.clone(),
                to: dest.clone()
            }
        );
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "content");
    }

    #[test]
    fn refuses_occupied_destination_and_leaves_both_files() {
        let base = tempfile::tempdir().unwrap();
        let src = base.path().join("a.txt");
        let dest = base.path().join("b.txt");
        fs::write(&src, "new").unwrap();
        fs::write(&dest, "old").unwrap();

        let err = move_file(&src, &dest).unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(fs::read_to_string(&src).unwrap(), "new");
        assert_eq!(fs::read_to_string(&dest).unwrap(), "old");
    }

    #[test]
    fn missing_source_does_not_create_directories() {
        let base = tempfile::tempdir().unwrap();
        let missing = base.path().join("gone.txt");

        let err = move_file(&missing, &base.path().join("new_dir/a.txt")).unwrap_err();

        assert!(matches!(err, MoveError::SourceMissing { .. }));
        assert!(!base.path().join("new_dir").exists());
    }

    #[test]
    fn same_path_is_unchanged() {
        let base = tempfile::tempdir().unwrap();
        let src = base.path().join("a.txt");
        fs::write(&src, "x").unwrap();

        assert_eq!(move_file(&src, &src).unwrap(), MoveOutcome::Unchanged);
        assert!(src.exists());
    }

    #[test]
    fn copy_fallback_preserves_content() {
        let base = tempfile::tempdir().unwrap();
        let src = base.path().join("a.bin");
        let dest = base.path().join("b.bin");
        fs::write(&src, [1u8, 2, 3]).unwrap();

        copy_then_remove(&src, &dest).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), vec![1u8, 2, 3]);
    }
}
