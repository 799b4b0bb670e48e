//! Static Asset Processor
//!
//! Mirrors each declared static directory into the package output. With
//! minification on, `.js` and `.css` files are minified on the way through;
//! every other file is copied unchanged.

use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{IoContext, PackageError, Result};
use crate::minify::{minify_asset_js, minify_css};
use crate::validate::confine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetKind {
    Script,
    Stylesheet,
    Other,
}

impl AssetKind {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("js") => AssetKind::Script,
            Some(ext) if ext.eq_ignore_ascii_case("css") => AssetKind::Stylesheet,
            _ => AssetKind::Other,
        }
    }
}

/// Relative location of a declared static directory. It must name a
/// subdirectory of the component that neither contains nor sits inside the
/// output directory.
pub fn check_static_dir(dir: &str, component_root: &Path, output_root: &Path) -> Result<PathBuf> {
    let relative = confine(dir, "static directory")?;
    if relative.as_os_str().is_empty() {
        return Err(PackageError::Validation(format!(
            "static directory `{}` must name a subdirectory of the component",
            dir
        )));
    }
    let src_root = component_root.join(&relative);
    if output_root.starts_with(&src_root) || src_root.starts_with(output_root) {
        return Err(PackageError::Validation(format!(
            "static directory `{}` overlaps the output directory {}",
            dir,
            output_root.display()
        )));
    }
    Ok(relative)
}

/// Process `dirs` in order. Stops at the first failing directory; anything
/// already written stays in place.
pub fn process_static_dirs(
    dirs: &[String],
    component_root: &Path,
    output_root: &Path,
    minify: bool,
) -> Result<()> {
    for dir in dirs {
        process_dir(dir, component_root, output_root, minify)?;
    }
    Ok(())
}

fn process_dir(dir: &str, component_root: &Path, output_root: &Path, minify: bool) -> Result<()> {
    let relative_dir = check_static_dir(dir, component_root, output_root)?;
    let src_root = component_root.join(&relative_dir);
    if !src_root.is_dir() {
        return Err(PackageError::missing(
            format!("static directory `{}`", dir),
            src_root,
        ));
    }
    let dest_root = output_root.join(&relative_dir);

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(&src_root).follow_links(true) {
        let entry = entry.map_err(|e| PackageError::StaticAsset {
            dir: dir.to_string(),
            file: e.path().map(Path::to_path_buf).unwrap_or_else(|| src_root.clone()),
            reason: e.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(&src_root)
            .unwrap_or(entry.path())
            .to_path_buf();

        if entry.file_type().is_dir() {
            let target = dest_root.join(&relative);
            fs::create_dir_all(&target).at(&target)?;
        } else {
            files.push(relative);
        }
    }

    log::debug!("static `{}`: {} file(s)", dir, files.len());

    files.par_iter().try_for_each(|relative| {
        process_file(&src_root.join(relative), &dest_root.join(relative), minify).map_err(
            |reason| PackageError::StaticAsset {
                dir: dir.to_string(),
                file: relative.clone(),
                reason,
            },
        )
    })?;

    log::info!("copied static directory `{}`", dir);
    Ok(())
}

fn process_file(src: &Path, dest: &Path, minify: bool) -> std::result::Result<(), String> {
    let kind = if minify { AssetKind::of(src) } else { AssetKind::Other };

    match kind {
        AssetKind::Other => fs::copy(src, dest).map(|_| ()).map_err(|e| e.to_string()),
        AssetKind::Script | AssetKind::Stylesheet => {
            let text = fs::read_to_string(src).map_err(|e| e.to_string())?;
            let out = if kind == AssetKind::Script {
                minify_asset_js(&text, &src.to_string_lossy()).map_err(|e| e.to_string())?
            } else {
                minify_css(&text)
            };
            fs::write(dest, out).map_err(|e| e.to_string())
        }
    }
}
