//! Locating the external transcoder binaries.
//!
//! wavemark needs `ffmpeg` for delivery codecs and for inputs the native
//! decoder cannot read; `ffprobe` is reported for diagnostics only. Each is
//! looked up once, when the [`ToolRegistry`] is built.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use wm_core::config::ToolsConfig;
use wm_core::Error;

/// Tools the registry looks for, in report order.
const KNOWN_TOOLS: &[&str] = &["ffmpeg", "ffprobe"];

/// Install prefixes probed, in order, before falling back to `PATH`.
pub const INSTALL_PREFIXES: &[&str] = &[
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
    "/opt/local/bin",
    "/snap/bin",
];

/// Where a tool's path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// `tools.<name>_path` in the configuration.
    Configured,
    /// One of [`INSTALL_PREFIXES`].
    InstallPrefix,
    /// The `PATH` search.
    SearchPath,
    /// Registered directly with [`ToolRegistry::with_tool`].
    Explicit,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolSource::Configured => "configured",
            ToolSource::InstallPrefix => "install prefix",
            ToolSource::SearchPath => "PATH",
            ToolSource::Explicit => "explicit",
        })
    }
}

/// A tool that was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTool {
    pub name: String,
    pub path: PathBuf,
    pub source: ToolSource,
}

/// One line of the `check-tools` report.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `<tool> -version`.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub source: Option<ToolSource>,
}

/// Resolved locations of the external tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ResolvedTool>,
}

impl ToolRegistry {
    /// Look every known tool up: the configured path if it exists, then
    /// `<prefix>/<tool>` for each of [`INSTALL_PREFIXES`], then `PATH`.
    /// Tools that are not found are left out; [`require`](Self::require)
    /// reports them.
    pub fn discover(config: &ToolsConfig) -> Self {
        Self::discover_in(config, INSTALL_PREFIXES)
    }

    /// [`discover`](Self::discover) with an explicit prefix list.
    pub fn discover_in(config: &ToolsConfig, prefixes: &[&str]) -> Self {
        let tools = KNOWN_TOOLS
            .iter()
            .filter_map(|&name| {
                let configured = match name {
                    "ffmpeg" => config.ffmpeg_path.as_deref(),
                    _ => config.ffprobe_path.as_deref(),
                };
                let found = locate(name, configured, prefixes);
                match &found {
                    Some(tool) => tracing::debug!(
                        tool = name,
                        path = %tool.path.display(),
                        source = %tool.source,
                        "tool located"
                    ),
                    None => tracing::debug!(tool = name, "tool not found"),
                }
                found.map(|tool| (name.to_string(), tool))
            })
            .collect();
        Self { tools }
    }

    /// Register (or replace) a tool at a known path.
    pub fn with_tool(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(
            name.to_string(),
            ResolvedTool {
                name: name.to_string(),
                path: path.into(),
                source: ToolSource::Explicit,
            },
        );
        self
    }

    /// The tool, or [`Error::ToolNotFound`].
    pub fn require(&self, name: &str) -> wm_core::Result<&ResolvedTool> {
        self.tools
            .get(name)
            .ok_or_else(|| Error::tool_not_found(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Availability report for every known tool. Runs `-version` on each
    /// tool that was found.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(tool) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: version_line(&tool.path),
                    path: Some(tool.path.clone()),
                    source: Some(tool.source),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                    source: None,
                },
            })
            .collect()
    }
}

fn locate(name: &str, configured: Option<&Path>, prefixes: &[&str]) -> Option<ResolvedTool> {
    let resolved = |path: PathBuf, source| ResolvedTool {
        name: name.to_string(),
        path,
        source,
    };

    if let Some(path) = configured {
        if path.is_file() {
            return Some(resolved(path.to_path_buf(), ToolSource::Configured));
        }
        tracing::warn!(tool = name, path = %path.display(), "configured tool path does not exist");
    }

    prefixes
        .iter()
        .map(|prefix| Path::new(prefix).join(name))
        .find(|candidate| candidate.is_file())
        .map(|path| resolved(path, ToolSource::InstallPrefix))
        .or_else(|| {
            which::which(name)
                .ok()
                .map(|path| resolved(path, ToolSource::SearchPath))
        })
}

fn version_line(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_owned)
}
