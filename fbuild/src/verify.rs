//! Acceptance smoke test run against the installed binary

use std::{
    env, fs,
    path::{self, Path, PathBuf},
    process::{Command, Output, Stdio},
};

use fbuild_meta::TestSpec;
use serde::Serialize;

use crate::{
    error::BuildError,
    logger::{self, TaskLogger},
    Result,
};

const CONFIG_FILE_NAME: &str = "fbuild-test.conf";

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub version_output: String,
    pub mirrors_output: String,
}

fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Runs the binary with no inherited state beyond PATH, inside `home`.
///
/// The binary path is made absolute first since the working directory changes.
fn sandboxed(binary: &Path, home: &Path) -> Command {
    let program = path::absolute(binary).unwrap_or_else(|_| binary.to_path_buf());
    let mut command = Command::new(program);
    command
        .env_clear()
        .env("PATH", env::var("PATH").unwrap_or_default())
        .env("HOME", home)
        .current_dir(home);
    command
}

fn capture(command: &mut Command, logger: &TaskLogger) -> Result<(Output, String)> {
    let output = logger::spawn(
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped()),
    )
    .and_then(|child| child.wait_with_output())
    .map_err(|e| {
        BuildError::VerificationFailed(format!("failed to run {:?}: {}", command, e))
    })?;
    let text = combined(&output);
    for line in text.lines() {
        logger.debug(line);
    }
    Ok((output, text))
}

/// `<bin> version` must succeed and report the marker and the exact version
pub fn check_version(
    binary: &Path,
    spec: &TestSpec,
    version: &str,
    home: &Path,
    logger: &TaskLogger,
) -> Result<String> {
    let (output, text) = capture(sandboxed(binary, home).arg("version"), logger)?;

    if !output.status.success() {
        return Err(BuildError::VerificationFailed(format!(
            "`version` exited with status: {}",
            output.status
        )));
    }
    if !text.contains(&spec.version_marker) {
        return Err(BuildError::VerificationFailed(format!(
            "`version` output lacks '{}': {}",
            spec.version_marker,
            text.trim()
        )));
    }
    if !text.contains(version) {
        return Err(BuildError::VerificationFailed(format!(
            "`version` output lacks version '{}': {}",
            version,
            text.trim()
        )));
    }
    Ok(text)
}

/// `<bin> -config=<file> mirror list` on an empty config must report no mirrors
pub fn check_mirror_list(
    binary: &Path,
    spec: &TestSpec,
    home: &Path,
    logger: &TaskLogger,
) -> Result<String> {
    let config = write_config(home, &spec.config)?;
    let (output, text) = capture(
        sandboxed(binary, home)
            .arg(format!("-config={}", config.display()))
            .args(["mirror", "list"]),
        logger,
    )?;

    if !output.status.success() {
        return Err(BuildError::VerificationFailed(format!(
            "`mirror list` exited with status: {}",
            output.status
        )));
    }
    if !text.contains(&spec.empty_mirrors_marker) {
        return Err(BuildError::VerificationFailed(format!(
            "`mirror list` output lacks '{}': {}",
            spec.empty_mirrors_marker,
            text.trim()
        )));
    }
    Ok(text)
}

fn write_config(home: &Path, content: &str) -> Result<PathBuf> {
    let path = home.join(CONFIG_FILE_NAME);
    fs::write(&path, content).map_err(|e| {
        BuildError::VerificationFailed(format!("writing {} failed: {}", path.display(), e))
    })?;
    Ok(path)
}

/// Run both checks in a throwaway home directory
pub fn verify(
    binary: &Path,
    spec: &TestSpec,
    version: &str,
    logger: &TaskLogger,
) -> Result<VerifyReport> {
    let sandbox = tempfile::Builder::new()
        .prefix("fbuild-test-")
        .tempdir()
        .map_err(|e| BuildError::VerificationFailed(format!("creating sandbox failed: {}", e)))?;

    logger.info(format!("Verifying {}", binary.display()));
    let version_output = check_version(binary, spec, version, sandbox.path(), logger)?;
    let mirrors_output = check_mirror_list(binary, spec, sandbox.path(), logger)?;
    logger.info("Verification passed");

    Ok(VerifyReport {
        version_output,
        mirrors_output,
    })
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("aptly");
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const GOOD: &str = r#"
case "$1" in
  version) echo "aptly version: 1.5.0" ;;
  -config=*)
    test -f "${1#-config=}" || exit 9
    echo "No mirrors found, create one with aptly mirror create." ;;
  *) exit 2 ;;
esac
"#;

    #[test]
    fn test_verify_passes() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), GOOD);

        let report = verify(&binary, &TestSpec::default(), "1.5.0", &TaskLogger::new()).unwrap();
        assert!(report.version_output.contains("aptly version: 1.5.0"));
        assert!(report.mirrors_output.contains("No mirrors found"));
    }

    #[test]
    fn test_wrong_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), GOOD);

        let result = verify(&binary, &TestSpec::default(), "1.6.0", &TaskLogger::new());
        assert!(matches!(result, Err(BuildError::VerificationFailed(_))));
    }

    #[test]
    fn test_marker_on_stderr_counts() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "echo \"aptly version: 2.0\" >&2\n");

        let logger = TaskLogger::new();
        let text = check_version(&binary, &TestSpec::default(), "2.0", dir.path(), &logger).unwrap();
        assert!(text.contains("2.0"));
    }

    #[test]
    fn test_nonzero_exit_fails_even_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "echo \"aptly version: 1.5.0\"\nexit 1\n");

        let logger = TaskLogger::new();
        let result = check_version(&binary, &TestSpec::default(), "1.5.0", dir.path(), &logger);
        assert!(matches!(result, Err(BuildError::VerificationFailed(_))));
    }

    #[test]
    fn test_mirror_list_without_marker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let binary = script(dir.path(), "echo \"List of mirrors:\"\n");

        let logger = TaskLogger::new();
        let result = check_mirror_list(&binary, &TestSpec::default(), dir.path(), &logger);
        assert!(matches!(result, Err(BuildError::VerificationFailed(_))));
    }

    #[test]
    fn test_relative_binary_path() {
        let dir = tempfile::Builder::new()
            .prefix(".fbuild-rel-")
            .tempdir_in(".")
            .unwrap();
        let binary = script(dir.path(), GOOD);
        assert!(binary.is_relative());

        let report = verify(&binary, &TestSpec::default(), "1.5.0", &TaskLogger::new()).unwrap();
        assert!(report.version_output.contains("1.5.0"));
    }

    #[test]
    fn test_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent");
        let result = verify(&absent, &TestSpec::default(), "1.5.0", &TaskLogger::new());
        assert!(matches!(result, Err(BuildError::VerificationFailed(_))));
    }
}
