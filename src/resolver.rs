//! Local Dependency Resolver
//!
//! Finds the local JSON files a data-provider script pulls in with
//! `require(...)`, without running any of its code. The script is parsed
//! with oxc and every `require` call whose argument is a literal string is
//! recorded. Local aliases are then read from the component directory and
//! parsed, producing the table the bundler embeds.

use oxc_allocator::Allocator;
use oxc_ast::ast::{Argument, CallExpression, Expression};
use oxc_ast_visit::{walk, Visit};
use oxc_parser::Parser;
use oxc_span::SourceType;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{IoContext, PackageError, Result};
use crate::validate::confine;

/// Default deadline for the dependency scan.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Alias as written in the source, mapped to the parsed JSON it names.
pub type LocalRequireMap = BTreeMap<String, Value>;

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct RequireCollector {
    aliases: Vec<String>,
    seen: HashSet<String>,
    dynamic: usize,
}

impl RequireCollector {
    fn record(&mut self, alias: &str) {
        if self.seen.insert(alias.to_string()) {
            self.aliases.push(alias.to_string());
        }
    }
}

impl<'a> Visit<'a> for RequireCollector {
    fn visit_call_expression(&mut self, expr: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &expr.callee {
            if ident.name == "require" && expr.arguments.len() == 1 {
                match &expr.arguments[0] {
                    Argument::StringLiteral(lit) => self.record(lit.value.as_str()),
                    Argument::TemplateLiteral(tpl) if tpl.expressions.is_empty() => {
                        match tpl.quasis.first().and_then(|q| q.value.cooked.as_ref()) {
                            Some(cooked) => self.record(cooked.as_str()),
                            None => self.dynamic += 1,
                        }
                    }
                    _ => self.dynamic += 1,
                }
            }
        }
        walk::walk_call_expression(self, expr);
    }
}

/// Every literal `require` alias in `source`, in order of first appearance.
pub fn scan_requires(source: &str) -> Result<Vec<String>> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::default().with_module(false)).parse();

    if ret.panicked || !ret.errors.is_empty() {
        let message = ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(PackageError::ScriptSyntax {
            file: "server.js".to_string(),
            message,
        });
    }

    let mut collector = RequireCollector::default();
    collector.visit_program(&ret.program);

    if collector.dynamic > 0 {
        log::warn!(
            "ignored {} require call(s) with a non-literal argument",
            collector.dynamic
        );
    }
    Ok(collector.aliases)
}

/// Run `scan_requires` on a worker thread, giving up after `timeout`.
pub fn scan_requires_with_deadline(source: &str, timeout: Duration) -> Result<Vec<String>> {
    let owned = source.to_string();
    run_with_deadline(timeout, move || scan_requires(&owned))
}

/// Run `job` on the `require-scan` worker and wait at most `timeout` for it.
///
/// On timeout the worker is left to finish on its own; whatever it owns is
/// dropped when it does.
pub fn run_with_deadline<T, F>(timeout: Duration, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("require-scan".to_string())
        .spawn(move || {
            let _ = tx.send(job());
        })
        .at("require-scan worker")?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(PackageError::ScanTimeout { timeout }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(PackageError::ScriptSyntax {
            file: "server.js".to_string(),
            message: "dependency scan worker exited without a result".to_string(),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

fn is_local(alias: &str) -> bool {
    alias.starts_with('.') || alias.starts_with('/')
}

/// Where a local alias points inside the component, with `.json` defaulted.
/// Aliases that climb out of the component are rejected.
fn local_path(component_root: &Path, alias: &str) -> Result<PathBuf> {
    let mut path = component_root.join(confine(alias.trim_start_matches('/'), "require")?);

    match path.extension() {
        None => {
            let mut name = path.file_name().unwrap_or_default().to_os_string();
            name.push(".json");
            path.set_file_name(name);
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => {}
        Some(_) => {
            return Err(PackageError::LocalJsNotAllowed {
                alias: alias.to_string(),
            })
        }
    }
    Ok(path)
}

fn load_json(alias: &str, path: &Path) -> Result<Value> {
    if !path.is_file() {
        return Err(PackageError::RequireNotFound {
            alias: alias.to_string(),
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path).at(path)?;
    serde_json::from_str(&text).map_err(|source| PackageError::JsonParse {
        alias: alias.to_string(),
        path: path.to_path_buf(),
        source,
    })
}

/// Build the local require map for a data-provider script.
pub fn resolve_local_requires(
    component_root: &Path,
    source: &str,
    timeout: Duration,
) -> Result<LocalRequireMap> {
    let aliases = scan_requires_with_deadline(source, timeout)?;
    let mut map = LocalRequireMap::new();

    for alias in aliases {
        if !is_local(&alias) {
            log::debug!("require `{}` left to the host", alias);
            continue;
        }
        let path = local_path(component_root, &alias)?;
        let value = load_json(&alias, &path)?;
        log::debug!("embedding `{}` from {}", alias, path.display());
        map.insert(alias, value);
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn component(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_scan_finds_literal_requires_in_order() {
        let src = r#"
            var a = require('./a');
            var lodash = require("lodash");
            function later() { return require(`./b.json`); }
            var again = require('./a');
            var dyn = require(name);
            var tpl = require(`./${name}`);
        "#;
        assert_eq!(
            scan_requires(src).unwrap(),
            vec!["./a", "lodash", "./b.json"]
        );
    }

    #[test]
    fn test_scan_rejects_unparseable_source() {
        let err = scan_requires("var = ;").unwrap_err();
        assert!(matches!(err, PackageError::ScriptSyntax { .. }));
    }

    #[test]
    fn test_resolves_local_json() {
        let dir = component(&[
            ("config.json", r#"{"a":1}"#),
            ("data/list.json", "[1,2]"),
        ]);
        let src = "var c = require('./config'); var l = require('/data/list.json'); require('fs');";
        let map = resolve_local_requires(dir.path(), src, DEFAULT_SCAN_TIMEOUT).unwrap();

        let mut expected = LocalRequireMap::new();
        expected.insert("./config".into(), json!({"a": 1}));
        expected.insert("/data/list.json".into(), json!([1, 2]));
        assert_eq!(map, expected);
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        let dir = component(&[("Upper.JSON", "true")]);
        let map =
            resolve_local_requires(dir.path(), "require('./Upper.JSON')", DEFAULT_SCAN_TIMEOUT)
                .unwrap();
        assert_eq!(map.get("./Upper.JSON"), Some(&json!(true)));
    }

    #[test]
    fn test_missing_local_file() {
        let dir = component(&[]);
        let err = resolve_local_requires(dir.path(), "require('./nope')", DEFAULT_SCAN_TIMEOUT)
            .unwrap_err();
        match err {
            PackageError::RequireNotFound { alias, path } => {
                assert_eq!(alias, "./nope");
                assert!(path.ends_with("nope.json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_local_js_not_allowed() {
        let dir = component(&[("helper.js", "module.exports = 1;")]);
        let err = resolve_local_requires(dir.path(), "require('./helper.js')", DEFAULT_SCAN_TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, PackageError::LocalJsNotAllowed { ref alias } if alias == "./helper.js"));
    }

    #[test]
    fn test_invalid_json() {
        let dir = component(&[("broken.json", "{nope")]);
        let err = resolve_local_requires(dir.path(), "require('./broken')", DEFAULT_SCAN_TIMEOUT)
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ERR_JSON_PARSE);
    }

    #[test]
    fn test_require_outside_component_is_rejected() {
        let outer = component(&[("secret.json", r#"{"token":"x"}"#)]);
        let root = outer.path().join("widget");
        fs::create_dir_all(&root).unwrap();

        for src in ["require('../secret')", "require('./a/../../secret.json')", "require('/../secret')"] {
            let err = resolve_local_requires(&root, src, DEFAULT_SCAN_TIMEOUT).unwrap_err();
            assert_eq!(err.code(), crate::error::ERR_VALIDATION, "{src} was resolved");
        }
    }

    #[test]
    fn test_scan_within_deadline() {
        let aliases =
            scan_requires_with_deadline("require('./x')", Duration::from_secs(30)).unwrap();
        assert_eq!(aliases, vec!["./x"]);
    }

    #[test]
    fn test_slow_job_times_out() {
        let err = run_with_deadline(Duration::from_millis(10), || {
            thread::sleep(Duration::from_millis(500));
            Ok(Vec::<String>::new())
        })
        .unwrap_err();
        match err {
            PackageError::ScanTimeout { timeout } => {
                assert_eq!(timeout, Duration::from_millis(10))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_job_error_is_passed_through() {
        let err = run_with_deadline(Duration::from_secs(30), || scan_requires("var = ;"))
            .unwrap_err();
        assert!(matches!(err, PackageError::ScriptSyntax { .. }));
    }
}
