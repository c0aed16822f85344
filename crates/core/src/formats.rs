//! File formats and the backend dispatch table.
//!
//! Dispatch is a pure function of `(source, target)`; it never looks at
//! which adapters are actually configured. The service layer performs that
//! second check.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Building-model formats the orchestrator knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Revit project.
    Rvt,
    /// Archicad project.
    Pln,
    /// Industry Foundation Classes.
    Ifc,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Rvt => "rvt",
            FileFormat::Pln => "pln",
            FileFormat::Ifc => "ifc",
        }
    }

    /// Parse a format name or extension (`"ifc"`, `".IFC"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "rvt" => Some(FileFormat::Rvt),
            "pln" => Some(FileFormat::Pln),
            "ifc" => Some(FileFormat::Ifc),
            _ => None,
        }
    }

    /// Target used when the client does not declare one.
    pub fn default_target(self) -> FileFormat {
        match self {
            FileFormat::Rvt | FileFormat::Pln => FileFormat::Ifc,
            FileFormat::Ifc => FileFormat::Rvt,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// The three conversion technologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Cloud derivative service.
    Cloud,
    /// Local bridge process relaying to a desktop plugin API.
    Bridge,
    /// Out-of-process native plugin over a duplex channel.
    Plugin,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Cloud => "cloud",
            BackendKind::Bridge => "bridge",
            BackendKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the source format from a file name's extension.
pub fn detect_source_format(file_name: &str) -> Result<FileFormat, CoreError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    FileFormat::parse(extension).ok_or_else(|| {
        if extension.is_empty() {
            CoreError::Validation(format!("File '{file_name}' has no extension"))
        } else {
            CoreError::Validation(format!(
                "Unsupported file format '.{}'; accepted formats are .rvt, .pln and .ifc",
                extension.to_ascii_lowercase()
            ))
        }
    })
}

/// Map a `(source, target)` pair to exactly one backend.
pub fn dispatch(source: FileFormat, target: FileFormat) -> Result<BackendKind, CoreError> {
    match (source, target) {
        (FileFormat::Rvt, FileFormat::Ifc) => Ok(BackendKind::Cloud),
        (FileFormat::Pln, FileFormat::Ifc) => Ok(BackendKind::Bridge),
        (FileFormat::Ifc, FileFormat::Pln) => Ok(BackendKind::Bridge),
        (FileFormat::Ifc, FileFormat::Rvt) => Ok(BackendKind::Plugin),
        _ => Err(CoreError::Dispatch(format!(
            "conversion from .{source} to .{target} is not supported"
        ))),
    }
}

/// Name of the artifact a conversion of `file_name` into `target` produces.
pub fn output_file_name(file_name: &str, target: FileFormat) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("output");
    format!("{stem}.{}", target.extension())
}
