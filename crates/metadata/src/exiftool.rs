use crate::error::{ErrorKind, Result};
use crate::{Extractor, Metadata, Writer};
use exn::ResultExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::instrument;

/// The exiftool executable, used both to read every tag of a file and to
/// write single tags back.
#[derive(Clone, Debug)]
pub struct Exiftool {
    path: PathBuf,
}
impl Exiftool {
    /// Looks for `exiftool` on `PATH`.
    pub fn discover() -> Result<Self> {
        match which::which("exiftool") {
            Ok(path) => {
                tracing::trace!(exiftool = %path.display(), "Discovered exiftool on system");
                Ok(Self { path })
            },
            Err(_) => exn::bail!(ErrorKind::ToolNotFound),
        }
    }

    /// Uses an explicit executable, e.g. from configuration.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn run(&self, args: &[OsString]) -> Result<Output> {
        Command::new(&self.path).args(args).output().or_raise(|| ErrorKind::Io)
    }
}

/// Exiftool reads any argument starting with a dash as an option.
fn file_argument(path: &Path) -> OsString {
    if path.is_relative() && path.as_os_str().as_encoded_bytes().starts_with(b"-") {
        Path::new(".").join(path).into_os_string()
    } else {
        path.as_os_str().to_owned()
    }
}

impl Extractor for Exiftool {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn extract(&self, path: &Path) -> Result<Metadata> {
        let output = self.run(&["-json".into(), file_argument(path)])?;
        if !output.status.success() {
            tracing::debug!(stderr = %String::from_utf8_lossy(&output.stderr), "exiftool failed to read file");
            exn::bail!(ErrorKind::Extraction(path.to_path_buf()));
        }
        Metadata::from_json_slice(&output.stdout)
    }
}

impl Writer for Exiftool {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn write_tag(&self, path: &Path, tag: &str, value: &str) -> Result<()> {
        let output = self.run(&["-overwrite_original".into(), format!("-{tag}={value}").into(), file_argument(path)])?;
        if !output.status.success() {
            tracing::warn!(stderr = %String::from_utf8_lossy(&output.stderr), "exiftool failed to write tag");
            exn::bail!(ErrorKind::Write(path.to_path_buf()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("photo.jpg", "photo.jpg")]
    #[case("-photo.jpg", "./-photo.jpg")]
    #[case("/tmp/-photo.jpg", "/tmp/-photo.jpg")]
    fn test_file_argument(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(file_argument(Path::new(path)), OsString::from(expected));
    }

    #[test]
    fn test_missing_executable() {
        let tool = Exiftool::new("/definitely/not/an/exiftool");
        let err = tool.extract(Path::new("photo.jpg")).unwrap_err();
        assert_eq!(*err, ErrorKind::Io);
    }
}
