//! Error Module for the Component Packager
//!
//! Every failure the pipeline can surface, each with a stable machine code.
//! Errors are never retried: the first one aborts the packaging run.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_VALIDATION: &str = "PKG-VALIDATION";
pub const ERR_MISSING_FILE: &str = "PKG-MISSING-FILE";
pub const ERR_MANIFEST_PARSE: &str = "PKG-MANIFEST-PARSE";
pub const ERR_UNSUPPORTED_TEMPLATE: &str = "PKG-UNSUPPORTED-TEMPLATE";
pub const ERR_TEMPLATE_SYNTAX: &str = "PKG-TEMPLATE-SYNTAX";
pub const ERR_SCRIPT_SYNTAX: &str = "PKG-SCRIPT-SYNTAX";
pub const ERR_REQUIRE_NOT_FOUND: &str = "PKG-REQUIRE-NOT-FOUND";
pub const ERR_LOCAL_JS: &str = "PKG-LOCAL-JS-NOT-ALLOWED";
pub const ERR_JSON_PARSE: &str = "PKG-JSON-PARSE";
pub const ERR_SCAN_TIMEOUT: &str = "PKG-SCAN-TIMEOUT";
pub const ERR_STATIC_ASSET: &str = "PKG-STATIC-ASSET";
pub const ERR_COMPRESS: &str = "PKG-COMPRESS";
pub const ERR_IO: &str = "PKG-IO";

pub type Result<T> = std::result::Result<T, PackageError>;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Bad component name or template type, or a required manifest field is absent.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{what} not found: {}", path.display())]
    MissingFile { what: String, path: PathBuf },

    #[error("{} is not valid JSON: {source}", path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported template type `{0}`")]
    UnsupportedTemplateType(String),

    #[error("template syntax error at line {line}: {message}")]
    TemplateSyntax { line: usize, message: String },

    #[error("could not parse script {file}: {message}")]
    ScriptSyntax { file: String, message: String },

    #[error("required local file `{alias}` not found at {}", path.display())]
    RequireNotFound { alias: String, path: PathBuf },

    #[error("requiring local js files is not allowed (`{alias}`); only .json files can be required")]
    LocalJsNotAllowed { alias: String },

    #[error("required file `{alias}` at {} is not valid JSON: {source}", path.display())]
    JsonParse {
        alias: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("dependency scan did not finish within {}ms", timeout.as_millis())]
    ScanTimeout { timeout: Duration },

    #[error("static directory `{dir}`: failed processing {}: {reason}", file.display())]
    StaticAsset {
        dir: String,
        file: PathBuf,
        reason: String,
    },

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PackageError {
    pub fn code(&self) -> &'static str {
        match self {
            PackageError::Validation(_) => ERR_VALIDATION,
            PackageError::MissingFile { .. } => ERR_MISSING_FILE,
            PackageError::ManifestParse { .. } => ERR_MANIFEST_PARSE,
            PackageError::UnsupportedTemplateType(_) => ERR_UNSUPPORTED_TEMPLATE,
            PackageError::TemplateSyntax { .. } => ERR_TEMPLATE_SYNTAX,
            PackageError::ScriptSyntax { .. } => ERR_SCRIPT_SYNTAX,
            PackageError::RequireNotFound { .. } => ERR_REQUIRE_NOT_FOUND,
            PackageError::LocalJsNotAllowed { .. } => ERR_LOCAL_JS,
            PackageError::JsonParse { .. } => ERR_JSON_PARSE,
            PackageError::ScanTimeout { .. } => ERR_SCAN_TIMEOUT,
            PackageError::StaticAsset { .. } => ERR_STATIC_ASSET,
            PackageError::Compress(_) => ERR_COMPRESS,
            PackageError::Io { .. } => ERR_IO,
        }
    }

    pub fn missing(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PackageError::MissingFile {
            what: what.into(),
            path: path.into(),
        }
    }

    pub fn template_syntax(line: usize, message: impl Into<String>) -> Self {
        PackageError::TemplateSyntax {
            line,
            message: message.into(),
        }
    }
}

/// Attach a path to a bare `io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| PackageError::Io {
            path: path.into(),
            source,
        })
    }
}
