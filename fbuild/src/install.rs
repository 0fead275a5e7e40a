//! Placing the built binary and its completion scripts under a prefix

use std::{
    fs::{self, File},
    io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use fbuild_meta::{sha256sum, Completion, Formula, Shell};
use serde::Serialize;

use crate::{error::BuildError, logger::TaskLogger, Result};

const BINARY_MODE: u32 = 0o755;
const DATA_MODE: u32 = 0o644;

/// Directory layout below an install prefix
#[derive(Debug, Clone)]
pub struct InstallLayout {
    prefix: PathBuf,
}

impl InstallLayout {
    pub fn new<P: Into<PathBuf>>(prefix: P) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn binary_path(&self, name: &str) -> PathBuf {
        self.bin_dir().join(name)
    }

    pub fn completion_dir(&self, shell: Shell) -> PathBuf {
        self.prefix.join(shell.completion_dir())
    }

    pub fn completion_path(&self, completion: &Completion) -> Option<PathBuf> {
        completion
            .file_name()
            .map(|name| self.completion_dir(completion.shell).join(name))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledFile {
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstalledSet {
    pub binary: InstalledFile,
    pub completions: Vec<InstalledFile>,
}

impl InstalledSet {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.binary.path.as_path())
            .chain(self.completions.iter().map(|c| c.path.as_path()))
    }

    /// Take back every file of this set, e.g. after a failed smoke test
    pub fn roll_back(&self, logger: &TaskLogger) {
        roll_back(self.paths(), logger);
    }
}

fn roll_back<'a, I>(paths: I, logger: &TaskLogger)
where
    I: IntoIterator<Item = &'a Path>,
{
    for path in paths {
        logger.warn(format!("Rolling back {}", path.display()));
        let _ = fs::remove_file(path);
    }
}

struct Placement {
    source: PathBuf,
    dest: PathBuf,
    mode: u32,
}

fn part_path(dest: &Path) -> PathBuf {
    PathBuf::from(format!("{}.part", dest.display()))
}

fn place(placement: &Placement) -> io::Result<()> {
    if let Some(parent) = placement.dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let part = part_path(&placement.dest);
    fs::copy(&placement.source, &part)?;
    fs::set_permissions(&part, fs::Permissions::from_mode(placement.mode))?;
    File::open(&part)?.sync_all()?;
    fs::rename(&part, &placement.dest)
}

fn plan(
    binary: &Path,
    tree: &Path,
    formula: &Formula,
    layout: &InstallLayout,
) -> Result<Vec<Placement>> {
    let mut plan = vec![Placement {
        source: binary.to_path_buf(),
        dest: layout.binary_path(&formula.name),
        mode: BINARY_MODE,
    }];

    for completion in &formula.completions {
        let source = tree.join(&completion.path);
        if !source.is_file() {
            return Err(BuildError::InstallFailed(format!(
                "{} completion not found in source tree: {}",
                completion.shell.as_str(),
                completion.path
            )));
        }
        let dest = layout.completion_path(completion).ok_or_else(|| {
            BuildError::InstallFailed(format!(
                "completion path has no file name: {}",
                completion.path
            ))
        })?;
        plan.push(Placement {
            source,
            dest,
            mode: DATA_MODE,
        });
    }

    Ok(plan)
}

/// Install the binary and declared completions.
///
/// Either every file lands or none of the newly placed files remain.
pub fn install(
    binary: &Path,
    tree: &Path,
    formula: &Formula,
    layout: &InstallLayout,
    logger: &TaskLogger,
) -> Result<InstalledSet> {
    if !binary.is_file() {
        return Err(BuildError::InstallFailed(format!(
            "built binary not found: {}",
            binary.display()
        )));
    }
    let plan = plan(binary, tree, formula, layout)?;

    let mut placed: Vec<&Path> = Vec::with_capacity(plan.len());
    let mut installed = Vec::with_capacity(plan.len());
    for placement in &plan {
        let result = place(placement).and_then(|_| {
            placed.push(&placement.dest);
            sha256sum(&placement.dest)
        });
        match result {
            Ok(sha256) => {
                logger.info(format!("Installed {} ({})", placement.dest.display(), sha256));
                installed.push(InstalledFile {
                    path: placement.dest.clone(),
                    sha256,
                });
            }
            Err(e) => {
                let _ = fs::remove_file(part_path(&placement.dest));
                roll_back(placed.iter().rev().copied(), logger);
                return Err(BuildError::InstallFailed(format!(
                    "placing {} failed: {}",
                    placement.dest.display(),
                    e
                )));
            }
        }
    }

    let mut installed = installed.into_iter();
    let binary = installed
        .next()
        .ok_or_else(|| BuildError::InstallFailed("nothing was installed".into()))?;
    Ok(InstalledSet {
        binary,
        completions: installed.collect(),
    })
}

/// Remove what `install` would place for `formula`; missing files are ignored
pub fn uninstall(
    formula: &Formula,
    layout: &InstallLayout,
    logger: &TaskLogger,
) -> Result<Vec<PathBuf>> {
    let mut targets = vec![layout.binary_path(&formula.name)];
    targets.extend(
        formula
            .completions
            .iter()
            .filter_map(|c| layout.completion_path(c)),
    );

    let mut removed = Vec::new();
    for target in targets {
        match fs::remove_file(&target) {
            Ok(()) => {
                logger.info(format!("Removed {}", target.display()));
                removed.push(target);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                logger.debug(format!("{} is not installed", target.display()));
            }
            Err(e) => {
                return Err(BuildError::InstallFailed(format!(
                    "removing {} failed: {}",
                    target.display(),
                    e
                )))
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMULA: &str = r#"
name: aptly
version: "1.5.0"
url: "https://example.com/aptly-1.5.0.tar.gz"
sha256: "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
completions:
  - shell: bash
    path: "completion.d/aptly"
  - shell: zsh
    path: "completion.d/_aptly"
"#;

    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let tree = dir.join("tree");
        fs::create_dir_all(tree.join("completion.d")).unwrap();
        fs::write(tree.join("completion.d/aptly"), "complete -F _aptly aptly\n").unwrap();
        fs::write(tree.join("completion.d/_aptly"), "#compdef aptly\n").unwrap();

        let binary = dir.join("out/aptly");
        fs::create_dir_all(binary.parent().unwrap()).unwrap();
        fs::write(&binary, "#!/bin/sh\necho aptly\n").unwrap();
        (binary, tree)
    }

    fn files_under(root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    files.push(path.strip_prefix(root).unwrap().to_path_buf());
                }
            }
        }
        files.sort();
        files
    }

    #[test]
    fn test_install_places_binary_and_completions() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, tree) = fixture(dir.path());
        let formula = Formula::from_yaml(FORMULA).unwrap();
        let layout = InstallLayout::new(dir.path().join("prefix"));

        let set = install(&binary, &tree, &formula, &layout, &TaskLogger::new()).unwrap();

        assert_eq!(set.binary.path, layout.prefix().join("bin/aptly"));
        let mode = fs::metadata(&set.binary.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            files_under(layout.prefix()),
            vec![
                PathBuf::from("bin/aptly"),
                PathBuf::from("etc/bash_completion.d/aptly"),
                PathBuf::from("share/zsh/site-functions/_aptly"),
            ]
        );
        assert_eq!(set.paths().count(), 3);
    }

    #[test]
    fn test_install_is_deterministic_across_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, tree) = fixture(dir.path());
        let formula = Formula::from_yaml(FORMULA).unwrap();
        let logger = TaskLogger::new();

        let first = InstallLayout::new(dir.path().join("one"));
        let second = InstallLayout::new(dir.path().join("two"));
        let a = install(&binary, &tree, &formula, &first, &logger).unwrap();
        let b = install(&binary, &tree, &formula, &second, &logger).unwrap();

        assert_eq!(files_under(first.prefix()), files_under(second.prefix()));
        assert_eq!(a.binary.sha256, b.binary.sha256);
        for rel in files_under(first.prefix()) {
            assert_eq!(
                fs::read(first.prefix().join(&rel)).unwrap(),
                fs::read(second.prefix().join(&rel)).unwrap()
            );
        }
    }

    #[test]
    fn test_missing_completion_leaves_prefix_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, tree) = fixture(dir.path());
        fs::remove_file(tree.join("completion.d/_aptly")).unwrap();
        let formula = Formula::from_yaml(FORMULA).unwrap();
        let layout = InstallLayout::new(dir.path().join("prefix"));

        let result = install(&binary, &tree, &formula, &layout, &TaskLogger::new());
        assert!(matches!(result, Err(BuildError::InstallFailed(_))));
        assert!(files_under(layout.prefix()).is_empty());
    }

    #[test]
    fn test_failed_placement_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, tree) = fixture(dir.path());
        let formula = Formula::from_yaml(FORMULA).unwrap();
        let layout = InstallLayout::new(dir.path().join("prefix"));

        // a directory in place of the zsh completion makes the final rename fail
        fs::create_dir_all(layout.prefix().join("share/zsh/site-functions/_aptly/x")).unwrap();

        let result = install(&binary, &tree, &formula, &layout, &TaskLogger::new());
        assert!(matches!(result, Err(BuildError::InstallFailed(_))));
        assert!(!layout.binary_path("aptly").exists());
        assert!(!layout.prefix().join("etc/bash_completion.d/aptly").exists());
        assert!(files_under(layout.prefix()).is_empty());
    }

    #[test]
    fn test_uninstall_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let (binary, tree) = fixture(dir.path());
        let formula = Formula::from_yaml(FORMULA).unwrap();
        let layout = InstallLayout::new(dir.path().join("prefix"));
        let logger = TaskLogger::new();

        install(&binary, &tree, &formula, &layout, &logger).unwrap();
        fs::remove_file(layout.prefix().join("etc/bash_completion.d/aptly")).unwrap();

        let removed = uninstall(&formula, &layout, &logger).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(files_under(layout.prefix()).is_empty());
        assert!(uninstall(&formula, &layout, &logger).unwrap().is_empty());
    }
}
