//! Package Assembler
//!
//! Turns one component directory into a package directory:
//!
//! ```text
//! Validating -> CompilingTemplate -> [BundlingData] -> WritingManifest -> CopyingStatic -> Done
//! ```
//!
//! Any stage can fail. The first error aborts the run and nothing already
//! written is rolled back; the next run starts by recreating the output
//! directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bundle::bundle_data_provider;
use crate::collaborators::{remove_file, Compressor, ToolVersionSource};
use crate::error::{IoContext, PackageError, Result};
use crate::manifest::{
    load_manifest, write_manifest, ComponentManifest, DataProviderFile, StaticDirs, TemplateFile,
    DATA_PROVIDER_TYPE, MANIFEST_FILE, SERVER_FILE, TEMPLATE_FILE,
};
use crate::resolver::{resolve_local_requires, DEFAULT_SCAN_TIMEOUT};
use crate::static_assets::{check_static_dir, process_static_dirs};
use crate::template;
use crate::validate::{confine, ComponentValidator, DefaultValidator, RESERVED_OUTPUT_DIR};

fn default_scan_timeout_ms() -> u64 {
    DEFAULT_SCAN_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOptions {
    pub component_path: PathBuf,
    /// Defaults to `<component>/_package`.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Deadline for the data provider's dependency scan.
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

impl PackageOptions {
    pub fn new(component_path: impl Into<PathBuf>) -> Self {
        Self {
            component_path: component_path.into(),
            output_path: None,
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| self.component_path.join(RESERVED_OUTPUT_DIR))
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    CompilingTemplate,
    BundlingData,
    WritingManifest,
    CopyingStatic,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::CompilingTemplate => "compiling template",
            Stage::BundlingData => "bundling data provider",
            Stage::WritingManifest => "writing manifest",
            Stage::CopyingStatic => "copying static assets",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct Packager {
    validator: Box<dyn ComponentValidator>,
    version_source: Box<dyn ToolVersionSource>,
}

impl Packager {
    pub fn new(version_source: impl ToolVersionSource + 'static) -> Self {
        Self {
            validator: Box::new(DefaultValidator),
            version_source: Box::new(version_source),
        }
    }

    pub fn with_validator(mut self, validator: impl ComponentValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Package the component described by `options` and return the
    /// manifest written into the package.
    pub fn package(&self, options: &PackageOptions) -> Result<ComponentManifest> {
        let mut stage = Stage::Validating;
        self.run(options, &mut stage).map_err(|err| {
            log::error!("packaging failed while {} [{}]: {}", stage, err.code(), err);
            err
        })
    }

    /// Package, then archive the package directory to `archive`. A stale
    /// archive from an earlier run is removed first.
    pub fn package_archive(
        &self,
        options: &PackageOptions,
        compressor: &dyn Compressor,
        archive: &Path,
    ) -> Result<ComponentManifest> {
        remove_file(archive)?;
        let manifest = self.package(options)?;
        compressor.compress(&options.output_dir(), archive)?;
        log::info!("archived package to {}", archive.display());
        Ok(manifest)
    }

    fn run(&self, options: &PackageOptions, stage: &mut Stage) -> Result<ComponentManifest> {
        let root = options.component_path.as_path();
        let output = options.output_dir();

        enter(stage, Stage::Validating);
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(PackageError::missing("component manifest", manifest_path));
        }
        let tool_version = self.version_source.tool_version()?;
        recreate_dir(root, &output)?;

        let mut manifest = load_manifest(&manifest_path)?;
        if !self.validator.is_valid_component_name(&manifest.name) {
            return Err(PackageError::Validation(format!(
                "component name `{}` is not allowed",
                manifest.name
            )));
        }
        let kind = manifest.packaging.files.template.kind.clone();
        if !self.validator.is_valid_template_type(&kind) {
            return Err(PackageError::UnsupportedTemplateType(kind));
        }
        let files = &mut manifest.packaging.files;
        let template_path = root.join(confine(&files.template.src, "template")?);
        if !template_path.is_file() {
            return Err(PackageError::missing("template", template_path));
        }
        let data_path = match files.data.take() {
            Some(data) => Some(root.join(confine(&data, "data provider")?)),
            None => None,
        };
        let static_dirs = files
            .static_dirs
            .take()
            .map(StaticDirs::into_vec)
            .unwrap_or_default();
        for dir in &static_dirs {
            check_static_dir(dir, root, &output)?;
        }

        enter(stage, Stage::CompilingTemplate);
        let source = fs::read_to_string(&template_path).at(&template_path)?;
        let artifact = template::compile(&source, &kind)?;
        write_artifact(&output, TEMPLATE_FILE, &artifact.compiled_source)?;

        let files = &mut manifest.packaging.files;
        files.template = TemplateFile {
            kind,
            hash_key: Some(artifact.hash_key),
            src: TEMPLATE_FILE.to_string(),
            extra: Default::default(),
        };
        files.client = None;

        if let Some(data_path) = data_path {
            enter(stage, Stage::BundlingData);
            if !data_path.is_file() {
                return Err(PackageError::missing("data provider", data_path));
            }
            let source = fs::read_to_string(&data_path).at(&data_path)?;
            let requires = resolve_local_requires(root, &source, options.scan_timeout())?;
            let artifact = bundle_data_provider(&requires, &source)?;
            write_artifact(&output, SERVER_FILE, &artifact.bundled_source)?;

            files.data_provider = Some(DataProviderFile {
                kind: DATA_PROVIDER_TYPE.to_string(),
                hash_key: artifact.hash_key,
                src: SERVER_FILE.to_string(),
            });
        }

        enter(stage, Stage::WritingManifest);
        files.static_dirs = Some(StaticDirs::Many(static_dirs.clone()));
        manifest.packaging.version = Some(tool_version);
        manifest.packaging.packaged = Some(true);
        write_manifest(&output.join(MANIFEST_FILE), &manifest)?;

        if !static_dirs.is_empty() {
            enter(stage, Stage::CopyingStatic);
            process_static_dirs(
                &static_dirs,
                root,
                &output,
                manifest.packaging.minify_enabled(),
            )?;
        }

        enter(stage, Stage::Done);
        log::info!(
            "packaged `{}` into {}",
            manifest.name,
            output.display()
        );
        Ok(manifest)
    }
}

fn enter(stage: &mut Stage, next: Stage) {
    *stage = next;
    log::info!("{}", next);
}

/// Delete and recreate the output directory. Refuses to touch the
/// component directory itself.
fn recreate_dir(component_root: &Path, output: &Path) -> Result<()> {
    if output == component_root || component_root.starts_with(output) {
        return Err(PackageError::Validation(format!(
            "output directory {} would overwrite the component",
            output.display()
        )));
    }
    if output.exists() {
        fs::remove_dir_all(output).at(output)?;
    }
    fs::create_dir_all(output).at(output)
}

fn write_artifact(output: &Path, file: &str, content: &str) -> Result<()> {
    let path = output.join(file);
    fs::write(&path, content).at(&path)?;
    log::debug!("wrote {} ({} bytes)", path.display(), content.len());
    Ok(())
}
