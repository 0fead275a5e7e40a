use std::{
    env, fs,
    path::{Path, PathBuf},
};

use fbuild_meta::Formula;

use crate::{
    error::BuildError,
    inspect::{inspect, BinaryInfo},
    install::{self, InstallLayout, InstalledSet},
    logger::TaskLogger,
    stage,
    toolchain::{BuildFlags, Toolchain},
    types::Provenance,
    verify::{self, VerifyReport},
    Result,
};

/// Host variables a toolchain invocation may see; everything else is cleared
pub const PASSTHROUGH_ENV: [&str; 13] = [
    "PATH",
    "HOME",
    "USER",
    "TMPDIR",
    "TERM",
    "GOPATH",
    "GOCACHE",
    "GOMODCACHE",
    "GOPROXY",
    "GOFLAGS",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
];

pub struct BuildContext {
    pub name: String,
    pub version: String,
    pub tree: PathBuf,
    pub outdir: PathBuf,
    extra_env: Vec<(String, String)>,
}

impl BuildContext {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        formula: &Formula,
        tree: P,
        outdir: Q,
        version: &str,
    ) -> Self {
        Self {
            name: formula.name.clone(),
            version: version.to_string(),
            tree: tree.into(),
            outdir: outdir.into(),
            extra_env: formula
                .build
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn binary_path(&self) -> PathBuf {
        self.outdir.join(&self.name)
    }

    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = PASSTHROUGH_ENV
            .iter()
            .filter_map(|key| env::var(key).ok().map(|val| (key.to_string(), val)))
            .collect();

        vars.extend(
            [
                ("fbuild_name", self.name.clone()),
                ("fbuild_version", self.version.clone()),
                ("fbuild_outdir", self.outdir.to_string_lossy().into_owned()),
            ]
            .into_iter()
            .map(|(key, value)| (key.to_uppercase(), value)),
        );

        vars.extend(self.extra_env.iter().cloned());
        vars
    }
}

/// Rejects labels that cannot be stamped into the binary verbatim
fn check_version_label(version: &str) -> Result<()> {
    if version.is_empty() || version.chars().any(char::is_whitespace) {
        return Err(BuildError::BuildFailed(format!(
            "invalid version label: {:?}",
            version
        )));
    }
    Ok(())
}

/// Outcome of a successful build
#[derive(Debug)]
pub struct BuildReport {
    pub name: String,
    pub version: String,
    pub provenance: Provenance,
    pub binary: Option<BinaryInfo>,
    pub installed: InstalledSet,
    pub verified: Option<VerifyReport>,
    /// Set when the working directory was kept
    pub workdir: Option<PathBuf>,
}

pub struct Builder {
    formula: Formula,
    toolchain: Toolchain,
    layout: InstallLayout,
    verify: bool,
    keep: bool,
}

impl Builder {
    pub fn new(formula: Formula, toolchain: Toolchain, layout: InstallLayout) -> Self {
        Builder {
            formula,
            toolchain,
            layout,
            verify: true,
            keep: false,
        }
    }

    /// Run the acceptance smoke test after installing
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Keep the working directory after a successful build
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Stage, build, install and verify the formula from `provenance`.
    ///
    /// The working directory holds `build.log` and is kept when the run fails.
    pub async fn run(&self, provenance: Provenance) -> Result<BuildReport> {
        let workdir = tempfile::Builder::new()
            .prefix(&format!("fbuild-{}-", self.formula.name))
            .tempdir()?;
        let logger = TaskLogger::with_log_file(workdir.path().join("build.log"))?;
        logger.write_to_file(format!(
            "fbuild v{} | {} from {} | {}",
            env!("CARGO_PKG_VERSION"),
            self.formula.name,
            provenance,
            chrono::Utc::now().to_rfc3339()
        ));

        let result = self.execute(provenance, workdir.path(), &logger).await;
        match result {
            Ok(mut report) => {
                if self.keep {
                    let path = workdir.keep();
                    logger.info(format!("Working directory kept at {}", path.display()));
                    report.workdir = Some(path);
                }
                Ok(report)
            }
            Err(err) => {
                logger.error(format!(
                    "{} failed while {}: {}",
                    self.formula.name,
                    err.phase(),
                    err
                ));
                let _ = workdir.keep();
                if let Some(log_path) = logger.log_path() {
                    logger.error(format!("Build log kept at {}", log_path.display()));
                }
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        provenance: Provenance,
        workdir: &Path,
        logger: &TaskLogger,
    ) -> Result<BuildReport> {
        let (tree, version) = self.stage(provenance, workdir, logger).await?;
        self.build_tree(&tree, provenance, &version, workdir, logger)
    }

    async fn stage(
        &self,
        provenance: Provenance,
        workdir: &Path,
        logger: &TaskLogger,
    ) -> Result<(PathBuf, String)> {
        let tree = workdir.join("src");

        match provenance {
            Provenance::ReleaseArchive => {
                logger.info(format!("Fetching {}", self.formula.url));
                let archive = stage::fetch_archive(
                    &self.formula.url,
                    workdir,
                    &self.formula.archive_name(),
                )
                .await?;

                let checksums = stage::verify_archive(&archive, &self.formula.sha256)?;
                logger.info(format!(
                    "Archive verified (sha256: {}, b3sum: {})",
                    checksums.sha256, checksums.b3sum
                ));

                stage::unpack_archive(&archive, &tree, logger)?;
                Ok((tree, self.formula.version.clone()))
            }
            Provenance::DevelopmentBranch => {
                let head = self.formula.head.as_ref().ok_or_else(|| {
                    BuildError::Fetch(format!(
                        "{} has no development branch",
                        self.formula.name
                    ))
                })?;
                logger.info(format!("Cloning {} ({})", head.url, head.branch));
                stage::clone_branch(&head.url, &head.branch, &tree, logger)?;
                Ok((tree.clone(), stage::head_version(&tree)))
            }
        }
    }

    /// Build, install and verify from an already staged source tree
    pub fn build_tree(
        &self,
        tree: &Path,
        provenance: Provenance,
        version: &str,
        workdir: &Path,
        logger: &TaskLogger,
    ) -> Result<BuildReport> {
        check_version_label(version)?;

        let context = BuildContext::new(&self.formula, tree, workdir.join("out"), version);
        fs::create_dir_all(&context.outdir).map_err(|e| {
            BuildError::BuildFailed(format!(
                "creating {} failed: {}",
                context.outdir.display(),
                e
            ))
        })?;

        if self.formula.build.generate {
            match provenance {
                Provenance::DevelopmentBranch => {
                    logger.info("Generating sources");
                    self.toolchain.generate(&context, logger)?;
                }
                Provenance::ReleaseArchive => {
                    logger.debug("Release archives ship generated sources; skipping generation");
                }
            }
        }

        logger.info(format!("Building {} {}", context.name, context.version));
        let flags = BuildFlags::from_spec(&self.formula.build);
        let binary = self
            .toolchain
            .build(&context, &flags, &self.formula.build.package, logger)?;

        let info = match inspect(&binary) {
            Ok(info) => {
                logger.info(format!("Built {} binary ({} bytes)", info.kind, info.size));
                if flags.strip && info.stripped == Some(false) {
                    logger.warn("Binary still carries a symbol table");
                }
                Some(info)
            }
            Err(e) => {
                logger.warn(format!("Could not inspect {}: {}", binary.display(), e));
                None
            }
        };

        let installed = install::install(&binary, tree, &self.formula, &self.layout, logger)?;

        let verified = if self.verify {
            let result = verify::verify(
                &installed.binary.path,
                &self.formula.test,
                version,
                logger,
            );
            match result {
                Ok(report) => Some(report),
                Err(err) => {
                    installed.roll_back(logger);
                    return Err(err);
                }
            }
        } else {
            logger.warn("Skipping verification");
            None
        };

        Ok(BuildReport {
            name: context.name,
            version: context.version,
            provenance,
            binary: info,
            installed,
            verified,
            workdir: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    /// Stand-in toolchain: records each subcommand in `$FAKE_GO_LOG` and
    /// `build` emits a script that answers the smoke test.
    const FAKE_GO: &str = r##"#!/bin/sh
echo "$1" >> "$FAKE_GO_LOG"
case "$1" in
  generate)
    if [ -n "$FAKE_GO_FAIL_GENERATE" ]; then
      echo "generate: boom" >&2
      exit 3
    fi
    echo generated > generated.txt
    exit 0 ;;
  build)
    shift
    out=""
    flags=""
    while [ $# -gt 0 ]; do
      case "$1" in
        -o) out="$2"; shift 2 ;;
        -ldflags) flags="$2"; shift 2 ;;
        *) shift ;;
      esac
    done
    ver="${flags##*=}"
    cat > "$out" <<EOF
#!/bin/sh
case "\$1" in
  version) echo "aptly version: $ver" ;;
  -config=*) [ "\$2 \$3" = "mirror list" ] && echo "No mirrors found, create one with aptly mirror create." ;;
  *) exit 2 ;;
esac
EOF
    chmod +x "$out"
    exit 0 ;;
esac
exit 1
"##;

    pub fn fake_toolchain(dir: &Path) -> Toolchain {
        let path = dir.join("go");
        fs::write(&path, FAKE_GO).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Toolchain::new(path)
    }

    pub fn formula(url: &str, sha256: &str, go_log: &Path, extra_env: &str) -> Formula {
        let yaml = format!(
            r#"
name: aptly
version: "1.5.0"
url: "{url}"
sha256: "{sha256}"
head:
  url: "https://github.com/aptly-dev/aptly.git"
build:
  generate: true
  env:
    FAKE_GO_LOG: "{log}"
{extra_env}
completions:
  - shell: bash
    path: "completion.d/aptly"
"#,
            log = go_log.display(),
        );
        Formula::from_yaml(&yaml).unwrap()
    }

    pub fn source_tree(dir: &Path) -> PathBuf {
        let tree = dir.join("aptly-1.5.0");
        fs::create_dir_all(tree.join("completion.d")).unwrap();
        fs::write(tree.join("completion.d/aptly"), "complete -F _aptly aptly\n").unwrap();
        fs::write(tree.join("main.go"), "package main\n").unwrap();
        tree
    }
}
