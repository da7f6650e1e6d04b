use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};

const TEMP_PREFIX: &str = ".metatask-";

/// The file a pipeline is currently operating on.
///
/// Temporaries are deleted when dropped, so replacing the working file or
/// abandoning a run (error, cancellation) cleans up after itself.
#[derive(Debug)]
pub(crate) enum WorkingFile {
    /// A source file, never modified in place.
    Original(PathBuf),
    /// A private file owned by this run.
    Temporary(TempPath),
}
impl WorkingFile {
    pub(crate) fn path(&self) -> &Path {
        match self {
            Self::Original(path) => path,
            Self::Temporary(path) => path,
        }
    }

    /// Copies `source` into a private temporary with the same extension.
    pub(crate) fn stage(source: &Path, temp_dir: Option<&Path>) -> Result<Self> {
        let path = reserve(temp_dir, extension_of(source).as_deref())?;
        fs::copy(source, &path).or_raise(|| ErrorKind::Io)?;
        tracing::debug!(source = %source.display(), working = %path.display(), "Staged working copy");
        Ok(Self::Temporary(path))
    }

    /// Moves the working file to `destination`.
    ///
    /// Without `overwrite` an existing destination is never replaced. Falls
    /// back to copying when the destination is on another filesystem. A
    /// temporary is always gone afterwards; an original is only gone when
    /// it could be renamed.
    pub(crate) fn place(self, destination: &Path, overwrite: bool) -> Result<()> {
        match self {
            Self::Temporary(path) => {
                let persisted =
                    if overwrite { path.persist(destination) } else { path.persist_noclobber(destination) };
                match persisted {
                    Ok(()) => Ok(()),
                    Err(e) if e.error.kind() == io::ErrorKind::CrossesDevices => {
                        copy(&e.path, destination, overwrite).or_raise(|| ErrorKind::Io)
                    },
                    Err(e) => Err(e.error).or_raise(|| ErrorKind::Io),
                }
            },
            Self::Original(path) => match fs::rename(&path, destination) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                    copy(&path, destination, overwrite).or_raise(|| ErrorKind::Io)?;
                    fs::remove_file(&path).or_raise(|| ErrorKind::Io)
                },
                Err(e) => Err(e).or_raise(|| ErrorKind::Io),
            },
        }
    }
}

/// Allocates a fresh temporary path and frees it again, so that tools which
/// refuse to write over an existing file can create it. The path is still
/// deleted on drop.
pub(crate) fn reserve(temp_dir: Option<&Path>, extension: Option<&str>) -> Result<TempPath> {
    let suffix = extension.map(|ext| format!(".{ext}")).unwrap_or_default();
    let mut builder = Builder::new();
    builder.prefix(TEMP_PREFIX).suffix(&suffix);
    let file = match temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .or_raise(|| ErrorKind::Io)?;
    let path = file.into_temp_path();
    fs::remove_file(&path).or_raise(|| ErrorKind::Io)?;
    Ok(path)
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|ext| ext.to_string_lossy().into_owned())
}

/// Copies `from` to `to`; a partially written destination is removed again.
fn copy(from: &Path, to: &Path, overwrite: bool) -> io::Result<()> {
    let mut source = File::open(from)?;
    let mut target = OpenOptions::new().write(true).truncate(true).create(overwrite).create_new(!overwrite).open(to)?;
    if let Err(e) = io::copy(&mut source, &mut target) {
        _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reserved_path_is_free_and_suffixed() {
        let dir = TempDir::new().unwrap();
        let path = reserve(Some(dir.path()), Some("png")).unwrap();
        assert!(!path.exists());
        assert!(path.to_string_lossy().ends_with(".png"));
        assert!(path.starts_with(dir.path()));
        // Created by a tool, still cleaned up on drop.
        fs::write(&path, b"x").unwrap();
        let kept = path.to_path_buf();
        drop(path);
        assert!(!kept.exists());
    }

    #[test]
    fn test_stage_copies_with_extension() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("song.flac");
        fs::write(&source, b"audio").unwrap();
        let working = WorkingFile::stage(&source, Some(dir.path())).unwrap();
        assert_eq!(working.path().extension().unwrap(), "flac");
        assert_eq!(fs::read(working.path()).unwrap(), b"audio");
        let staged = working.path().to_path_buf();
        drop(working);
        assert!(!staged.exists());
        assert!(source.exists());
    }

    #[test]
    fn test_place_never_clobbers() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("taken.txt");
        fs::write(&destination, b"old").unwrap();
        let path = reserve(Some(dir.path()), None).unwrap();
        fs::write(&path, b"new").unwrap();
        let leftover = path.to_path_buf();

        assert!(WorkingFile::Temporary(path).place(&destination, false).is_err());
        assert_eq!(fs::read(&destination).unwrap(), b"old");
        assert!(!leftover.exists());
    }

    #[test]
    fn test_place_overwrite() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("same.txt");
        fs::write(&destination, b"old").unwrap();
        let path = reserve(Some(dir.path()), None).unwrap();
        fs::write(&path, b"new").unwrap();

        WorkingFile::Temporary(path).place(&destination, true).unwrap();
        assert_eq!(fs::read(&destination).unwrap(), b"new");
    }
}
