use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::Error;

/// The pipeline output file shared with later steps
///
/// Values are published as `KEY=value` lines. The file is only ever appended to.
#[derive(Clone, Debug)]
pub struct OutputFile {
    path: PathBuf,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the output file from an optional configured path
    pub fn from_config(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) if !path.as_os_str().is_empty() => Ok(Self::new(path)),
            _ => Err(Error::Io(
                "pipeline output file is not set",
                std::io::Error::new(std::io::ErrorKind::NotFound, "DRONE_OUTPUT is empty"),
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single `key=value` line, creating the file if needed
    pub async fn write_env(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .map_err(|err| Error::Io("failed to open output file", err))?;

        file.write_all(format!("{key}={value}\n").as_bytes())
            .await
            .map_err(|err| Error::Io("failed to write to output file", err))?;
        file.flush()
            .await
            .map_err(|err| Error::Io("failed to write to output file", err))?;

        debug!(key, path = ?self.path, "wrote env line");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputFile::new(dir.path().join("output.env"));

        output.write_env("key", "value").await.unwrap();
        output.write_env("other", "a=b").await.unwrap();

        let contents = std::fs::read_to_string(output.path()).unwrap();
        assert_eq!(contents, "key=value\nother=a=b\n");
    }

    #[tokio::test]
    async fn keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.env");
        std::fs::write(&path, "EXISTING=1\n").unwrap();

        OutputFile::new(&path).write_env("NEW", "2").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "EXISTING=1\nNEW=2\n");
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputFile::new(dir.path().join("missing").join("output.env"));
        let err = output.write_env("key", "value").await.unwrap_err();
        assert!(matches!(err, Error::Io("failed to open output file", _)));
    }

    #[test]
    fn unset_path_is_an_io_error() {
        assert!(matches!(OutputFile::from_config(None), Err(Error::Io(..))));
        assert!(matches!(
            OutputFile::from_config(Some(Path::new(""))),
            Err(Error::Io(..))
        ));
    }
}
