//! Sandboxed Bundler
//!
//! Serves a data provider's local JSON requires from an embedded table.
//! The original source runs inside a function whose `require` parameter is
//! a lookup that answers known aliases from the table and hands everything
//! else to the host's own `require`:
//!
//! ```text
//! (function(require){ ...source... }).call(this,(function(m,f){...})({"./config":{...}},require));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{PackageError, Result};
use crate::hash::compute_hash;
use crate::minify::minify_script;
use crate::resolver::LocalRequireMap;

/// Builds the lookup-with-fallback `require` from a table and the host's `require`.
const LOOKUP_FACTORY: &str = "function(m,f){return function(a){return Object.prototype.hasOwnProperty.call(m,a)?m[a]:f(a)}}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProviderArtifact {
    pub hash_key: String,
    pub bundled_source: String,
}

/// Wrap `source` so local requires resolve from `requires`, then minify.
/// An empty map leaves the source as is apart from minification.
pub fn bundle(requires: &LocalRequireMap, source: &str) -> Result<String> {
    if requires.is_empty() {
        return minify_script(source, "server.js");
    }

    let table = serde_json::to_string(requires)
        .map_err(|e| PackageError::Validation(format!("cannot embed local requires: {}", e)))?;
    let wrapped = format!(
        "(function(require){{{}\n}}).call(this,({})({},require));",
        source, LOOKUP_FACTORY, table
    );

    log::debug!("embedded {} local require(s)", requires.len());
    minify_script(&wrapped, "server.js")
}

/// Bundle and key the result by the hash of the bundled text.
pub fn bundle_data_provider(
    requires: &LocalRequireMap,
    source: &str,
) -> Result<DataProviderArtifact> {
    let bundled_source = bundle(requires, source)?;
    Ok(DataProviderArtifact {
        hash_key: compute_hash(&bundled_source),
        bundled_source,
    })
}
