//! External tool detection.
//!
//! The [`ToolRegistry`] locates ffmpeg and ffprobe, honouring configured
//! overrides, and reports their versions for `check-tools`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fp_core::config::ToolsConfig;
use serde::{Deserialize, Serialize};

/// Tools the ffmpeg runtime needs.
pub const KNOWN_TOOLS: &[&str] = &["ffmpeg", "ffprobe"];

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry of discovered tool paths.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Discover tools from configured overrides, falling back to `PATH`.
    ///
    /// An override that does not exist is logged and ignored. Tools that are
    /// not found anywhere are omitted.
    pub fn discover(config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom = match name {
                "ffmpeg" => config.ffmpeg_path.as_deref(),
                "ffprobe" => config.ffprobe_path.as_deref(),
                _ => None,
            };

            let resolved = match custom {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(tool = name, path = %p.display(), "configured tool path missing; searching PATH");
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            match resolved {
                Some(path) => {
                    tracing::debug!(tool = name, path = %path.display(), "tool found");
                    tools.insert(name.to_string(), path);
                }
                None => tracing::debug!(tool = name, "tool not found"),
            }
        }

        Self { tools }
    }

    /// Register a tool path explicitly.
    pub fn with_tool(mut self, name: &str, path: PathBuf) -> Self {
        self.tools.insert(name.to_string(), path);
        self
    }

    /// Path of `name`, or [`fp_core::Error::Tool`] if it was not found.
    pub fn require(&self, name: &str) -> fp_core::Result<&Path> {
        self.tools.get(name).map(PathBuf::as_path).ok_or_else(|| {
            fp_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Availability of every known tool.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(path),
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
}
