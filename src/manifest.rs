//! Component manifest model.
//!
//! Only the fields the packager reads or rewrites are typed; everything else
//! in the manifest and in its `packaging` block rides along in `extra` maps
//! and is written back in the order it was read.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{IoContext, PackageError, Result};

pub const MANIFEST_FILE: &str = "package.json";
pub const TEMPLATE_FILE: &str = "template.js";
pub const SERVER_FILE: &str = "server.js";
/// `type` recorded for a bundled data provider.
pub const DATA_PROVIDER_TYPE: &str = "platform-script";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub packaging: Packaging,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packaging {
    pub files: PackagingFiles,
    /// Minify static `.js` and `.css`. Defaults to on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,
    /// Version of the tool that produced the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packaged: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Packaging {
    pub fn minify_enabled(&self) -> bool {
        self.minify.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagingFiles {
    pub template: TemplateFile,
    /// Path of the data-provider script, relative to the component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "dataProvider", default, skip_serializing_if = "Option::is_none")]
    pub data_provider: Option<DataProviderFile>,
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub static_dirs: Option<StaticDirs>,
    /// Legacy client-side template entry; dropped on packaging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFile {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "hashKey", default, skip_serializing_if = "Option::is_none")]
    pub hash_key: Option<String>,
    pub src: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProviderFile {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "hashKey")]
    pub hash_key: String,
    pub src: String,
}

/// `static` may name one directory or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticDirs {
    One(String),
    Many(Vec<String>),
}

impl StaticDirs {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StaticDirs::One(dir) => vec![dir],
            StaticDirs::Many(dirs) => dirs,
        }
    }
}

/// Read and type-check a manifest. Broken JSON is a `ManifestParse` error;
/// well-formed JSON missing required fields is a `Validation` error.
pub fn load_manifest(path: &Path) -> Result<ComponentManifest> {
    if !path.is_file() {
        return Err(PackageError::missing("component manifest", path));
    }
    let text = fs::read_to_string(path).at(path)?;

    serde_json::from_str(&text).map_err(|source| match source.classify() {
        serde_json::error::Category::Data => {
            PackageError::Validation(format!("{}: {}", path.display(), source))
        }
        _ => PackageError::ManifestParse {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Write a manifest as pretty JSON with a trailing newline.
pub fn write_manifest(path: &Path, manifest: &ComponentManifest) -> Result<()> {
    let mut text = serde_json::to_string_pretty(manifest)
        .map_err(io::Error::from)
        .at(path)?;
    text.push('\n');
    fs::write(path, text).at(path)
}
