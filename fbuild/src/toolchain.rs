use std::{
    path::{Path, PathBuf},
    process::Command,
};

use fbuild_meta::BuildSpec;

use crate::{builder::BuildContext, error::BuildError, logger::TaskLogger, Result};

/// Link-time options shared by every build of a formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFlags {
    pub strip: bool,
    pub trimpath: bool,
    pub version_var: String,
}

impl BuildFlags {
    pub fn from_spec(spec: &BuildSpec) -> Self {
        Self {
            strip: spec.strip,
            trimpath: true,
            version_var: spec.version_var.clone(),
        }
    }

    /// `-s -w -X main.Version=<version>`
    pub fn ldflags(&self, version: &str) -> String {
        let stamp = format!("-X {}={}", self.version_var, version);
        if self.strip {
            format!("-s -w {}", stamp)
        } else {
            stamp
        }
    }

    pub fn build_args(&self, out: &Path, package: &str, version: &str) -> Vec<String> {
        let mut args = vec!["build".to_string()];
        if self.trimpath {
            args.push("-trimpath".to_string());
        }
        args.extend([
            "-o".to_string(),
            out.to_string_lossy().into_owned(),
            "-ldflags".to_string(),
            self.ldflags(version),
            package.to_string(),
        ]);
        args
    }
}

/// The language toolchain a formula builds with
#[derive(Debug, Clone)]
pub struct Toolchain {
    program: PathBuf,
}

impl Toolchain {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolve the formula's toolchain on PATH
    pub fn locate(spec: &BuildSpec) -> Result<Self> {
        which::which(&spec.toolchain)
            .map(Self::new)
            .map_err(|_| {
                BuildError::BuildFailed(format!(
                    "{} is unavailable. Please install it to continue.",
                    spec.toolchain
                ))
            })
    }

    fn command(&self, context: &BuildContext) -> Command {
        let mut command = Command::new(&self.program);
        command
            .current_dir(&context.tree)
            .env_clear()
            .envs(context.env_vars());
        command
    }

    /// `<toolchain> generate` in the source tree
    pub fn generate(&self, context: &BuildContext, logger: &TaskLogger) -> Result<()> {
        let status = logger
            .run(self.command(context).arg("generate"))
            .map_err(|e| {
                BuildError::GenerationFailed(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !status.success() {
            return Err(BuildError::GenerationFailed(format!(
                "`{} generate` exited with status: {}",
                self.program.display(),
                status
            )));
        }
        Ok(())
    }

    /// Compile the single binary into the context's output directory
    pub fn build(
        &self,
        context: &BuildContext,
        flags: &BuildFlags,
        package: &str,
        logger: &TaskLogger,
    ) -> Result<PathBuf> {
        let out = context.binary_path();
        let args = flags.build_args(&out, package, &context.version);

        let status = logger
            .run(self.command(context).args(&args))
            .map_err(|e| {
                BuildError::BuildFailed(format!("failed to run {}: {}", self.program.display(), e))
            })?;

        if !status.success() {
            return Err(BuildError::BuildFailed(format!(
                "`{} build` exited with status: {}",
                self.program.display(),
                status
            )));
        }
        if !out.is_file() {
            return Err(BuildError::BuildFailed(format!(
                "{} should exist after the build but doesn't.",
                out.display()
            )));
        }
        Ok(out)
    }
}
