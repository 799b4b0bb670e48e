//! # Component Packager
//!
//! Packages a component (a view template, an optional server-side data
//! provider and optional static assets) into a versioned directory a
//! rendering runtime can serve.
//!
//! ## Pipeline
//!
//! 1. **Template**: jade or handlebars is precompiled to a render function,
//!    hashed, registered under `oc.components[<hash>]` and minified.
//! 2. **Data provider**: `require` calls are found by parsing (never running)
//!    the script. Local `.json` requires are read and embedded; requiring
//!    local code is refused. The script is wrapped so embedded values are
//!    served from the table and everything else falls through to the host.
//! 3. **Static assets**: declared directories are copied in order, with
//!    `.js` and `.css` minified unless `packaging.minify` is `false`.
//! 4. **Manifest**: the component's `package.json` is rewritten to point at
//!    the produced files and stamped with the tool version.
//!
//! Errors abort the run at the first failure and carry a stable `PKG-*` code.

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod bundle;
pub mod collaborators;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod minify;
pub mod package;
pub mod resolver;
pub mod static_assets;
pub mod template;
pub mod validate;

#[cfg(test)]
mod package_tests;

pub use bundle::{bundle, bundle_data_provider, DataProviderArtifact};
pub use collaborators::{remove_file, Compressor, FixedVersion, ManifestVersion, ToolVersionSource};
pub use error::{PackageError, Result};
pub use hash::compute_hash;
pub use manifest::{ComponentManifest, StaticDirs};
pub use package::{PackageOptions, Packager, Stage};
pub use resolver::{resolve_local_requires, LocalRequireMap};
pub use static_assets::process_static_dirs;
pub use template::{compile, compile_template, TemplateArtifact, TemplateType};
pub use validate::{ComponentValidator, DefaultValidator};

#[cfg(feature = "napi")]
fn to_napi_error(err: PackageError) -> napi::Error {
    napi::Error::from_reason(format!("[{}] {}", err.code(), err))
}

/// Package a component. `options` uses the camelCase `PackageOptions` shape;
/// the result is the rewritten manifest.
#[cfg(feature = "napi")]
#[napi]
pub fn package_component_native(
    options: serde_json::Value,
    tool_version: String,
) -> napi::Result<serde_json::Value> {
    let _ = env_logger::try_init();

    let options: PackageOptions = serde_json::from_value(options)
        .map_err(|e| napi::Error::from_reason(format!("invalid options: {}", e)))?;
    let manifest = Packager::new(FixedVersion(tool_version))
        .package(&options)
        .map_err(to_napi_error)?;

    serde_json::to_value(manifest).map_err(|e| napi::Error::from_reason(e.to_string()))
}

/// Compile one template; returns `{hashKey, compiledSource}`.
#[cfg(feature = "napi")]
#[napi]
pub fn compile_template_native(source: String, kind: String) -> napi::Result<serde_json::Value> {
    let _ = env_logger::try_init();

    let artifact = compile(&source, &kind).map_err(to_napi_error)?;
    serde_json::to_value(artifact).map_err(|e| napi::Error::from_reason(e.to_string()))
}
