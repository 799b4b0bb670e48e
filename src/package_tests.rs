use crate::collaborators::{Compressor, FixedVersion, ManifestVersion};
use crate::error::{self, PackageError, Result};
use crate::manifest::{StaticDirs, MANIFEST_FILE, SERVER_FILE, TEMPLATE_FILE};
use crate::package::{PackageOptions, Packager};
use crate::validate::ComponentValidator;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const TOOL_VERSION: &str = "3.4.5";

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn component(manifest: Value) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), MANIFEST_FILE, &manifest.to_string());
    write(dir.path(), "template.jade", "div.greeting\n  p Hello #{name}\n");
    dir
}

fn basic_manifest() -> Value {
    json!({
        "name": "hello-world",
        "version": "1.0.0",
        "description": "greets",
        "packaging": {
            "files": {
                "template": {"type": "jade", "src": "template.jade"}
            }
        }
    })
}

fn packager() -> Packager {
    Packager::new(FixedVersion(TOOL_VERSION.into()))
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_template_only_component() {
    let dir = component(basic_manifest());
    let options = PackageOptions::new(dir.path());
    let manifest = packager().package(&options).unwrap();

    let out = dir.path().join("_package");
    assert!(out.join(TEMPLATE_FILE).is_file());
    assert!(!out.join(SERVER_FILE).exists());

    let template = &manifest.packaging.files.template;
    assert_eq!(template.kind, "jade");
    assert_eq!(template.src, TEMPLATE_FILE);
    let hash = template.hash_key.clone().unwrap();
    let compiled = fs::read_to_string(out.join(TEMPLATE_FILE)).unwrap();
    assert!(compiled.contains(&hash));

    let written = read_json(&out.join(MANIFEST_FILE));
    assert_eq!(written, serde_json::to_value(&manifest).unwrap());
    assert_eq!(written["description"], json!("greets"));
}

#[test]
fn test_repackaging_is_deterministic() {
    let dir = component(basic_manifest());
    let options = PackageOptions::new(dir.path());
    let first = packager().package(&options).unwrap();
    let first_js = fs::read_to_string(dir.path().join("_package").join(TEMPLATE_FILE)).unwrap();

    let second = packager().package(&options).unwrap();
    let second_js = fs::read_to_string(dir.path().join("_package").join(TEMPLATE_FILE)).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_js, second_js);
}

#[test]
fn test_manifest_normalization() {
    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["client"] = json!({"src": "client.js"});
    manifest["packaging"]["files"]["template"]["legacy"] = json!("x");
    manifest["packaging"]["files"]["template"]["hashKey"] = json!("stale");
    let dir = component(manifest);

    let result = packager().package(&PackageOptions::new(dir.path())).unwrap();
    let written = read_json(&dir.path().join("_package").join(MANIFEST_FILE));
    let files = &written["packaging"]["files"];

    assert_eq!(files["static"], json!([]));
    assert!(files.get("client").is_none());
    assert!(files.get("data").is_none());
    assert!(files.get("dataProvider").is_none());
    assert_eq!(
        files["template"],
        json!({
            "type": "jade",
            "hashKey": result.packaging.files.template.hash_key.clone().unwrap(),
            "src": "template.js"
        })
    );
    assert_eq!(written["packaging"]["version"], json!(TOOL_VERSION));
    assert_eq!(written["packaging"]["packaged"], json!(true));
}

#[test]
fn test_data_provider_embeds_local_json() {
    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["data"] = json!("server.js");
    let dir = component(manifest);
    write(dir.path(), "config.json", r#"{"a":1}"#);
    write(
        dir.path(),
        "server.js",
        "var config = require('./config');\nmodule.exports.data = function (ctx, cb) { cb(null, config); };\n",
    );

    let result = packager().package(&PackageOptions::new(dir.path())).unwrap();
    let out = dir.path().join("_package");
    let bundled = fs::read_to_string(out.join(SERVER_FILE)).unwrap();

    assert!(bundled.contains(r#"({"./config":{"a":1}},require)"#));
    assert!(bundled.contains("Object.prototype.hasOwnProperty.call(m,a)?m[a]:f(a)"));
    assert!(!bundled.contains("readFileSync"));

    let provider = result.packaging.files.data_provider.clone().unwrap();
    assert_eq!(provider.kind, "platform-script");
    assert_eq!(provider.src, SERVER_FILE);
    assert_eq!(provider.hash_key, crate::hash::compute_hash(&bundled));
    assert!(result.packaging.files.data.is_none());
}

#[test]
fn test_falsy_json_is_embedded() {
    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["data"] = json!("server.js");
    let dir = component(manifest);
    write(dir.path(), "flag.json", "false");
    write(
        dir.path(),
        "server.js",
        "var flag = require('./flag');\nmodule.exports.data = function (ctx, cb) { cb(null, { enabled: flag }); };\n",
    );

    packager().package(&PackageOptions::new(dir.path())).unwrap();
    let bundled = fs::read_to_string(dir.path().join("_package").join(SERVER_FILE)).unwrap();

    assert!(bundled.contains(r#"({"./flag":false},require)"#));
    assert!(bundled.contains("Object.prototype.hasOwnProperty.call(m,a)?m[a]:f(a)"));
}

#[test]
fn test_missing_local_dependency_fails_closed() {
    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["data"] = json!("server.js");
    let dir = component(manifest);
    write(dir.path(), "server.js", "var c = require('./missing');");

    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert_eq!(err.code(), error::ERR_REQUIRE_NOT_FOUND);
    assert!(!dir.path().join("_package").join(SERVER_FILE).exists());
}

#[test]
fn test_local_js_require_fails_closed() {
    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["data"] = json!("server.js");
    let dir = component(manifest);
    write(dir.path(), "helper.js", "module.exports = 1;");
    write(dir.path(), "server.js", "var h = require('./helper.js');");

    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert!(matches!(err, PackageError::LocalJsNotAllowed { .. }));
    assert!(!dir.path().join("_package").join(SERVER_FILE).exists());
}

#[test]
fn test_declared_data_file_must_exist() {
    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["data"] = json!("server.js");
    let dir = component(manifest);

    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert_eq!(err.code(), error::ERR_MISSING_FILE);
}

#[test]
fn test_static_order_and_fail_fast() {
    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["static"] = json!(["a", "b"]);
    let dir = component(manifest);
    write(dir.path(), "a/one.txt", "1");
    write(dir.path(), "a/deep/two.txt", "2");

    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    match err {
        PackageError::MissingFile { path, .. } => assert!(path.ends_with("b")),
        other => panic!("unexpected error: {other:?}"),
    }

    let out = dir.path().join("_package");
    assert!(out.join("a/one.txt").is_file());
    assert!(out.join("a/deep/two.txt").is_file());
    // the manifest stage runs before static copying and is not rolled back
    assert!(out.join(MANIFEST_FILE).is_file());
}

#[test]
fn test_minify_opt_out_and_default() {
    let js = "var  spaced   =  1 ;\n";
    let css = "body {\n  color: red;\n}\n";

    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["static"] = json!("public");
    manifest["packaging"]["minify"] = json!(false);
    let plain = component(manifest);
    write(plain.path(), "public/app.js", js);
    let result = packager().package(&PackageOptions::new(plain.path())).unwrap();
    assert_eq!(
        result.packaging.files.static_dirs,
        Some(StaticDirs::Many(vec!["public".into()]))
    );
    assert_eq!(
        fs::read_to_string(plain.path().join("_package/public/app.js")).unwrap(),
        js
    );

    let mut manifest = basic_manifest();
    manifest["packaging"]["files"]["static"] = json!(["public"]);
    let minified = component(manifest);
    write(minified.path(), "public/site.css", css);
    packager().package(&PackageOptions::new(minified.path())).unwrap();
    let out = fs::read_to_string(minified.path().join("_package/public/site.css")).unwrap();
    assert_ne!(out, css);
    assert_eq!(out, "body{color:red}");
}

#[test]
fn test_output_dir_is_recreated() {
    let dir = component(basic_manifest());
    let out = TempDir::new().unwrap();
    let output_path = out.path().join("pkg");
    write(&output_path, "stale.txt", "old");

    let options = PackageOptions {
        output_path: Some(output_path.clone()),
        ..PackageOptions::new(dir.path())
    };
    packager().package(&options).unwrap();

    assert!(!output_path.join("stale.txt").exists());
    assert!(output_path.join(TEMPLATE_FILE).is_file());
}

#[test]
fn test_validation_failures() {
    let mut bad_name = basic_manifest();
    bad_name["name"] = json!("bad name");
    let dir = component(bad_name);
    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert_eq!(err.code(), error::ERR_VALIDATION);

    let mut bad_type = basic_manifest();
    bad_type["packaging"]["files"]["template"]["type"] = json!("ejs");
    let dir = component(bad_type);
    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert!(matches!(err, PackageError::UnsupportedTemplateType(ref t) if t == "ejs"));

    let mut missing_template = basic_manifest();
    missing_template["packaging"]["files"]["template"]["src"] = json!("nope.jade");
    let dir = component(missing_template);
    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert_eq!(err.code(), error::ERR_MISSING_FILE);

    let dir = TempDir::new().unwrap();
    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert_eq!(err.code(), error::ERR_MISSING_FILE);

    let dir = TempDir::new().unwrap();
    write(dir.path(), MANIFEST_FILE, "{ nope");
    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert_eq!(err.code(), error::ERR_MANIFEST_PARSE);
}

#[test]
fn test_missing_tool_manifest_fails_validation() {
    let dir = component(basic_manifest());
    let tool = TempDir::new().unwrap();
    let packager = Packager::new(ManifestVersion::new(tool.path().join("package.json")));

    let err = packager.package(&PackageOptions::new(dir.path())).unwrap_err();
    assert_eq!(err.code(), error::ERR_MISSING_FILE);
    assert!(!dir.path().join("_package").exists());
}

#[test]
fn test_refuses_to_overwrite_component() {
    let dir = component(basic_manifest());
    let options = PackageOptions {
        output_path: Some(dir.path().to_path_buf()),
        ..PackageOptions::new(dir.path())
    };
    let err = packager().package(&options).unwrap_err();
    assert_eq!(err.code(), error::ERR_VALIDATION);
    assert!(dir.path().join(MANIFEST_FILE).is_file());
}

struct AllowAll;

impl ComponentValidator for AllowAll {
    fn is_valid_component_name(&self, _name: &str) -> bool {
        true
    }
    fn is_valid_template_type(&self, _kind: &str) -> bool {
        true
    }
}

#[test]
fn test_custom_validator_still_needs_a_compiler() {
    let mut manifest = basic_manifest();
    manifest["name"] = json!("any name at all");
    manifest["packaging"]["files"]["template"]["type"] = json!("ejs");
    let dir = component(manifest);

    let err = packager()
        .with_validator(AllowAll)
        .package(&PackageOptions::new(dir.path()))
        .unwrap_err();
    assert!(matches!(err, PackageError::UnsupportedTemplateType(_)));
}

#[derive(Default)]
struct RecordingCompressor {
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl Compressor for RecordingCompressor {
    fn compress(&self, input_dir: &Path, output_file: &Path) -> Result<()> {
        fs::write(output_file, "archive").map_err(|e| PackageError::Compress(e.to_string()))?;
        self.calls
            .lock()
            .unwrap()
            .push((input_dir.to_path_buf(), output_file.to_path_buf()));
        Ok(())
    }
}

#[test]
fn test_package_archive() {
    let dir = component(basic_manifest());
    let archive_dir = TempDir::new().unwrap();
    let archive = archive_dir.path().join("package.tar.gz");
    write(archive_dir.path(), "package.tar.gz", "stale");

    let compressor = RecordingCompressor::default();
    let options = PackageOptions::new(dir.path());
    packager()
        .package_archive(&options, &compressor, &archive)
        .unwrap();

    assert_eq!(fs::read_to_string(&archive).unwrap(), "archive");
    let calls = compressor.calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &[(options.output_dir(), archive.clone())]);
}

#[test]
fn test_options_from_camel_case_json() {
    let options: PackageOptions =
        serde_json::from_value(json!({"componentPath": "/c", "scanTimeoutMs": 250})).unwrap();
    assert_eq!(options.output_dir(), Path::new("/c").join("_package"));
    assert_eq!(options.scan_timeout().as_millis(), 250);

    let defaults: PackageOptions =
        serde_json::from_value(json!({"componentPath": "/c", "outputPath": "/out"})).unwrap();
    assert_eq!(defaults.output_dir(), PathBuf::from("/out"));
    assert_eq!(defaults.scan_timeout_ms, 5_000);
}

#[test]
fn test_absolute_static_dir_is_rejected() {
    let dir = component(basic_manifest());
    write(dir.path(), "assets/app.css", "a { color: red; }");
    let mut manifest = basic_manifest();
    let absolute = dir.path().join("assets").to_string_lossy().into_owned();
    manifest["packaging"]["files"]["static"] = json!([absolute]);
    write(dir.path(), MANIFEST_FILE, &manifest.to_string());

    let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
    assert_eq!(err.code(), error::ERR_VALIDATION);
    assert_eq!(
        fs::read_to_string(dir.path().join("assets/app.css")).unwrap(),
        "a { color: red; }"
    );
    assert!(!dir.path().join("_package").join(TEMPLATE_FILE).exists());
}

#[test]
fn test_static_dir_covering_the_output_is_rejected() {
    for declared in [".", "_package/../assets/..", "_package"] {
        let mut manifest = basic_manifest();
        manifest["packaging"]["files"]["static"] = json!([declared]);
        let dir = component(manifest);
        write(dir.path(), "assets/app.css", "a{}");

        let err = packager().package(&PackageOptions::new(dir.path())).unwrap_err();
        assert_eq!(err.code(), error::ERR_VALIDATION, "{declared} was accepted");
    }
}

#[test]
fn test_declared_files_must_stay_inside_component() {
    let outer = TempDir::new().unwrap();
    write(outer.path(), "secret.jade", "p leaked\n");
    write(outer.path(), "secret.js", "module.exports.data = function (ctx, cb) { cb(null, {}); };\n");
    let secret_template = outer.path().join("secret.jade").to_string_lossy().into_owned();

    let cases = [
        ("template", json!(secret_template)),
        ("template", json!("../secret.jade")),
        ("data", json!("/etc/hostname")),
        ("data", json!("../secret.js")),
    ];
    for (field, value) in cases {
        let root = outer.path().join("widget");
        let mut manifest = basic_manifest();
        if field == "template" {
            manifest["packaging"]["files"]["template"]["src"] = value.clone();
        } else {
            manifest["packaging"]["files"]["data"] = value.clone();
        }
        write(&root, MANIFEST_FILE, &manifest.to_string());
        write(&root, "template.jade", "p hi\n");

        let err = packager().package(&PackageOptions::new(&root)).unwrap_err();
        assert_eq!(err.code(), error::ERR_VALIDATION, "{field} {value} was accepted");
        assert!(!root.join("_package").join(TEMPLATE_FILE).exists());
    }
}
