//! Formula parsing and handling

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{bottle::BottleSpec, Error, Result};

pub const DEFAULT_VERSION_MARKER: &str = "aptly version:";
pub const DEFAULT_EMPTY_MIRRORS_MARKER: &str = "No mirrors found, create one with";
pub const DEFAULT_TEST_CONFIG: &str = "{}";

/// Development branch checkout
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HeadSpec {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "master".to_string()
}

/// How the single binary is produced
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildSpec {
    /// Toolchain program resolved on PATH
    #[serde(default = "default_toolchain")]
    pub toolchain: String,

    /// Run `<toolchain> generate` before building a development branch
    #[serde(default)]
    pub generate: bool,

    /// Linker-visible variable receiving the version, e.g. `main.Version`
    #[serde(default = "default_version_var")]
    pub version_var: String,

    /// Strip the symbol table and debug info (`-s -w`)
    #[serde(default = "default_true")]
    pub strip: bool,

    /// Package path handed to `<toolchain> build`
    #[serde(default = "default_package")]
    pub package: String,

    /// Extra environment for toolchain invocations
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            toolchain: default_toolchain(),
            generate: false,
            version_var: default_version_var(),
            strip: true,
            package: default_package(),
            env: IndexMap::new(),
        }
    }
}

fn default_toolchain() -> String {
    "go".to_string()
}

fn default_version_var() -> String {
    "main.Version".to_string()
}

fn default_package() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
}

impl Shell {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Shell::Bash => "bash",
            Shell::Zsh => "zsh",
            Shell::Fish => "fish",
        }
    }

    /// Completion directory relative to the install prefix
    pub const fn completion_dir(&self) -> &'static str {
        match self {
            Shell::Bash => "etc/bash_completion.d",
            Shell::Zsh => "share/zsh/site-functions",
            Shell::Fish => "share/fish/vendor_completions.d",
        }
    }
}

/// A completion script shipped in the source tree
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Completion {
    pub shell: Shell,
    /// Path relative to the source tree root
    pub path: String,
}

impl Completion {
    /// File name the script is installed under
    pub fn file_name(&self) -> Option<&str> {
        Path::new(&self.path).file_name().and_then(|n| n.to_str())
    }
}

/// Expected output of the acceptance smoke test
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TestSpec {
    #[serde(default = "default_version_marker")]
    pub version_marker: String,

    #[serde(default = "default_test_config")]
    pub config: String,

    #[serde(default = "default_empty_mirrors_marker")]
    pub empty_mirrors_marker: String,
}

impl Default for TestSpec {
    fn default() -> Self {
        Self {
            version_marker: default_version_marker(),
            config: default_test_config(),
            empty_mirrors_marker: default_empty_mirrors_marker(),
        }
    }
}

fn default_version_marker() -> String {
    DEFAULT_VERSION_MARKER.to_string()
}

fn default_test_config() -> String {
    DEFAULT_TEST_CONFIG.to_string()
}

fn default_empty_mirrors_marker() -> String {
    DEFAULT_EMPTY_MIRRORS_MARKER.to_string()
}

/// Parsed formula
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Formula {
    /// Package and binary name
    pub name: String,

    #[serde(default)]
    pub desc: Option<String>,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    /// Version of the tagged release archive
    pub version: String,

    /// Release archive location
    pub url: String,

    /// Declared SHA-256 of the release archive
    pub sha256: String,

    #[serde(default)]
    pub head: Option<HeadSpec>,

    /// Needed at build time only
    #[serde(default)]
    pub build_dependencies: Vec<String>,

    #[serde(default)]
    pub build: BuildSpec,

    #[serde(default)]
    pub completions: Vec<Completion>,

    #[serde(default)]
    pub bottle: Option<BottleSpec>,

    #[serde(default)]
    pub test: TestSpec,
}

impl Formula {
    /// Parse a formula from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let formula: Formula = serde_yml::from_str(content)?;
        formula.check()?;
        Ok(formula)
    }

    /// Parse a formula from a file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Formula("'name' cannot be empty".into()));
        }
        if self.name.contains('/') {
            return Err(Error::Formula(format!(
                "'name' must not contain '/': {}",
                self.name
            )));
        }
        if self.version.trim().is_empty() {
            return Err(Error::Formula("'version' cannot be empty".into()));
        }
        for completion in &self.completions {
            if completion.file_name().is_none() {
                return Err(Error::Formula(format!(
                    "completion path has no file name: {}",
                    completion.path
                )));
            }
        }
        Ok(())
    }

    /// File name of the release archive as given by the URL
    pub fn archive_name(&self) -> String {
        let trimmed = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        trimmed
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("{}-{}.tar.gz", self.name, self.version))
    }
}

/// Formula files below `dir`, sorted
pub fn formula_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for ext in ["yaml", "yml"] {
        let pattern = dir.join(format!("**/*.{}", ext));
        for entry in glob::glob(&pattern.to_string_lossy())? {
            match entry {
                Ok(path) if path.is_file() => paths.push(path),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Glob error: {}", e);
                }
            }
        }
    }

    paths.sort();
    Ok(paths)
}
