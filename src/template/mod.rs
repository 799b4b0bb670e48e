//! Template Compiler
//!
//! Precompiles a view template to a client-side render function, keys it by
//! the hash of the compiled text and wraps it in a registration statement so
//! a rendering runtime can find the renderer from the hash alone:
//!
//! ```text
//! var oc=oc||{};oc.components=oc.components||{};oc.components["<hash>"]=function(locals){...};
//! ```
//!
//! Hashing the compiled text (not the raw template) means two templates that
//! precompile identically share a cache entry, and edits that don't change
//! the compiled output don't invalidate it.

mod emit;
mod handlebars;
mod jade;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PackageError, Result};
use crate::hash::compute_hash;
use crate::minify::minify_script;

/// Global object the rendering runtime reads renderers from.
pub const REGISTRY_NAMESPACE: &str = "oc";
/// Bucket inside the namespace holding component renderers.
pub const REGISTRY_BUCKET: &str = "components";

lazy_static! {
    static ref NAMED_DECLARATION_RE: Regex =
        Regex::new(r"^\s*function\s+template\s*\(\s*locals\s*\)\s*\{").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateType {
    Jade,
    Handlebars,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Jade => "jade",
            TemplateType::Handlebars => "handlebars",
        }
    }
}

impl FromStr for TemplateType {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jade" => Ok(TemplateType::Jade),
            "handlebars" => Ok(TemplateType::Handlebars),
            other => Err(PackageError::UnsupportedTemplateType(other.to_string())),
        }
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateArtifact {
    pub hash_key: String,
    pub compiled_source: String,
}

/// Compile a template given its declared type name.
pub fn compile(source: &str, kind: &str) -> Result<TemplateArtifact> {
    compile_template(source, kind.parse()?)
}

pub fn compile_template(source: &str, kind: TemplateType) -> Result<TemplateArtifact> {
    let named = match kind {
        TemplateType::Jade => jade::precompile(source)?,
        TemplateType::Handlebars => handlebars::precompile(source)?,
    };
    let compiled = to_anonymous_closure(&named);
    let hash_key = compute_hash(&compiled);
    let wrapped = registration_statement(&hash_key, &compiled);
    let compiled_source = minify_script(&wrapped, "template.js")?;

    log::debug!(
        "compiled {} template ({} bytes) to {}",
        kind,
        source.len(),
        hash_key
    );

    Ok(TemplateArtifact {
        hash_key,
        compiled_source,
    })
}

/// `function template(locals){` becomes `function(locals){`.
fn to_anonymous_closure(named: &str) -> String {
    NAMED_DECLARATION_RE
        .replace(named, "function(locals){")
        .into_owned()
}

fn registration_statement(hash_key: &str, compiled: &str) -> String {
    format!(
        "var {ns}={ns}||{{}};{ns}.{bucket}={ns}.{bucket}||{{}};{ns}.{bucket}[{key}]={compiled};",
        ns = REGISTRY_NAMESPACE,
        bucket = REGISTRY_BUCKET,
        key = emit::js_string(hash_key),
        compiled = compiled
    )
}
