//! Seams to the tools around the packager: where the packaging tool's own
//! version comes from, how a finished package is archived, and cleanup.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, PackageError, Result};

/// Supplies the version stamped into `packaging.version`.
pub trait ToolVersionSource: Send + Sync {
    fn tool_version(&self) -> Result<String>;
}

/// Reads `version` from the packaging tool's own `package.json`.
#[derive(Debug, Clone)]
pub struct ManifestVersion {
    path: PathBuf,
}

impl ManifestVersion {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Deserialize)]
struct VersionOnly {
    version: String,
}

impl ToolVersionSource for ManifestVersion {
    fn tool_version(&self) -> Result<String> {
        if !self.path.is_file() {
            return Err(PackageError::missing("packaging tool manifest", &self.path));
        }
        let text = fs::read_to_string(&self.path).at(&self.path)?;
        let parsed: VersionOnly =
            serde_json::from_str(&text).map_err(|source| PackageError::ManifestParse {
                path: self.path.clone(),
                source,
            })?;
        Ok(parsed.version)
    }
}

/// A version known up front, e.g. the host's own.
#[derive(Debug, Clone)]
pub struct FixedVersion(pub String);

impl ToolVersionSource for FixedVersion {
    fn tool_version(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Turns a package directory into a single archive file.
pub trait Compressor: Send + Sync {
    fn compress(&self, input_dir: &Path, output_file: &Path) -> Result<()>;
}

/// Delete a file; a file that is already gone is fine.
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).at(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("package.json");
        let source = ManifestVersion::new(&path);

        assert_eq!(
            source.tool_version().unwrap_err().code(),
            crate::error::ERR_MISSING_FILE
        );

        fs::write(&path, r#"{"name": "packager", "version": "0.9.3"}"#).unwrap();
        assert_eq!(source.tool_version().unwrap(), "0.9.3");

        fs::write(&path, r#"{"name": "packager"}"#).unwrap();
        assert_eq!(
            source.tool_version().unwrap_err().code(),
            crate::error::ERR_MANIFEST_PARSE
        );
    }

    #[test]
    fn test_fixed_version() {
        assert_eq!(FixedVersion("1.2.3".into()).tool_version().unwrap(), "1.2.3");
    }

    #[test]
    fn test_remove_file_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("package.tar.gz");
        remove_file(&path).unwrap();

        fs::write(&path, "x").unwrap();
        remove_file(&path).unwrap();
        assert!(!path.exists());
    }
}
