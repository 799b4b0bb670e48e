//! Naming and template-type validation.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

use crate::error::{PackageError, Result};
use crate::template::TemplateType;

/// Directory name the packaged output is written to inside a component.
/// A component may not take this name.
pub const RESERVED_OUTPUT_DIR: &str = "_package";

lazy_static! {
    static ref COMPONENT_NAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Checks applied to a component manifest before anything is compiled.
pub trait ComponentValidator: Send + Sync {
    fn is_valid_component_name(&self, name: &str) -> bool;
    fn is_valid_template_type(&self, kind: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

impl ComponentValidator for DefaultValidator {
    fn is_valid_component_name(&self, name: &str) -> bool {
        COMPONENT_NAME_RE.is_match(name) && name != RESERVED_OUTPUT_DIR
    }

    fn is_valid_template_type(&self, kind: &str) -> bool {
        kind.parse::<TemplateType>().is_ok()
    }
}

/// Normalize a path declared in the manifest to one relative to the
/// component root. Absolute paths and `..` segments that climb above the
/// root are rejected; `what` names the field in the error.
pub fn confine(declared: &str, what: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(declared).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(PackageError::Validation(format!(
                        "{} `{}` leaves the component directory",
                        what, declared
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PackageError::Validation(format!(
                    "{} `{}` must be relative to the component directory",
                    what, declared
                )));
            }
        }
    }
    Ok(relative)
}
