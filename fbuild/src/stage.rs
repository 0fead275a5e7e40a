//! Source acquisition: release archives and development branches

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use fbuild_meta::{compute_checksums, Checksums};
use futures::StreamExt;
use reqwest::header::USER_AGENT;

use crate::{error::BuildError, logger::TaskLogger, Result};

pub async fn download<P: AsRef<Path>>(url: &str, out: P) -> Result<()> {
    let fetch_error = |e: reqwest::Error| BuildError::Fetch(format!("{}: {}", url, e));

    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .header(USER_AGENT, concat!("fbuild/", env!("CARGO_PKG_VERSION")))
        .send()
        .await
        .map_err(fetch_error)?;

    if !response.status().is_success() {
        return Err(BuildError::Fetch(format!(
            "Error downloading {}: {}",
            url,
            response.status()
        )));
    }

    let output_path = out.as_ref();
    if let Some(output_dir) = output_path.parent() {
        fs::create_dir_all(output_dir)?;
    }

    let temp_path = PathBuf::from(format!("{}.part", output_path.display()));
    let _ = fs::remove_file(&temp_path);
    let mut stream = response.bytes_stream();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&temp_path)?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(fetch_error)?;
        file.write_all(&chunk)?;
    }
    file.flush()?;

    fs::rename(&temp_path, output_path)?;

    Ok(())
}

/// Bring the release archive into `dest_dir` as `file_name`.
///
/// `http(s)://` URLs are downloaded and `file://` URLs are copied.
pub async fn fetch_archive(url: &str, dest_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let out = dest_dir.join(file_name);

    if url.starts_with("http://") || url.starts_with("https://") {
        download(url, &out).await?;
    } else if let Some(local) = url.strip_prefix("file://") {
        fs::create_dir_all(dest_dir)?;
        fs::copy(local, &out).map_err(|e| BuildError::Fetch(format!("{}: {}", local, e)))?;
    } else {
        return Err(BuildError::Fetch(format!("unsupported archive URL: {}", url)));
    }

    Ok(out)
}

/// Compare the archive against its declared SHA-256
pub fn verify_archive<P: AsRef<Path>>(archive: P, expected: &str) -> Result<Checksums> {
    let checksums = compute_checksums(archive)?;
    if !checksums.matches_sha256(expected) {
        return Err(BuildError::IntegrityFailed {
            expected: expected.to_string(),
            actual: checksums.sha256,
        });
    }
    Ok(checksums)
}

/// Unpack a release archive, dropping its top-level directory
pub fn unpack_archive(archive: &Path, dest: &Path, logger: &TaskLogger) -> Result<()> {
    let tar = which::which("tar").map_err(|_| BuildError::Fetch("tar is unavailable".into()))?;
    fs::create_dir_all(dest)?;

    let status = logger
        .run(
            Command::new(tar)
                .arg("-xf")
                .arg(archive)
                .arg("-C")
                .arg(dest)
                .arg("--strip-components=1"),
        )
        .map_err(|e| BuildError::Fetch(format!("failed to run tar: {}", e)))?;

    if !status.success() {
        return Err(BuildError::Fetch(format!(
            "unpacking {} failed with status: {}",
            archive.display(),
            status
        )));
    }
    Ok(())
}

/// Shallow clone of a development branch
pub fn clone_branch(url: &str, branch: &str, dest: &Path, logger: &TaskLogger) -> Result<()> {
    let git = which::which("git").map_err(|_| BuildError::Fetch("git is unavailable".into()))?;

    let status = logger
        .run(
            Command::new(git)
                .args(["clone", "--depth", "1", "--branch", branch, url])
                .arg(dest),
        )
        .map_err(|e| BuildError::Fetch(format!("failed to run git: {}", e)))?;

    if !status.success() {
        return Err(BuildError::Fetch(format!(
            "cloning {} ({}) failed with status: {}",
            url, branch, status
        )));
    }
    Ok(())
}

/// Version label for a development checkout: `HEAD-<short sha>`, or `HEAD`
pub fn head_version(tree: &Path) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(tree)
        .args(["rev-parse", "--short", "HEAD"])
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if sha.is_empty() {
                "HEAD".to_string()
            } else {
                format!("HEAD-{}", sha)
            }
        }
        _ => "HEAD".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn test_fetch_local_archive() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("upstream.tar.gz");
        fs::write(&src, b"hello world").unwrap();

        let dest = dir.path().join("work");
        let url = format!("file://{}", src.display());
        let fetched = fetch_archive(&url, &dest, "a.tar.gz").await.unwrap();

        assert_eq!(fetched, dest.join("a.tar.gz"));
        assert_eq!(fs::read(fetched).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_fetch_plain_path_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("upstream.tar.gz");
        fs::write(&src, b"hello world").unwrap();

        let dest = dir.path().join("work");
        let result = fetch_archive(src.to_str().unwrap(), &dest, "a.tar.gz").await;
        assert!(matches!(result, Err(BuildError::Fetch(_))));
        assert!(!dest.join("a.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_fetch_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            fetch_archive("file:///nonexistent/fbuild.tar.gz", dir.path(), "a.tar.gz").await;
        assert!(matches!(result, Err(BuildError::Fetch(_))));
    }

    #[test]
    fn test_verify_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.tar.gz");
        fs::write(&archive, b"hello world").unwrap();

        assert!(verify_archive(&archive, HELLO_SHA256).is_ok());

        fs::write(&archive, b"hello world, tampered").unwrap();
        match verify_archive(&archive, HELLO_SHA256) {
            Err(BuildError::IntegrityFailed { expected, actual }) => {
                assert_eq!(expected, HELLO_SHA256);
                assert_ne!(actual, HELLO_SHA256);
            }
            other => panic!("expected IntegrityFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_unpack_strips_top_level_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("aptly-1.5.0");
        fs::create_dir_all(src.join("completion.d")).unwrap();
        fs::write(src.join("completion.d/aptly"), "complete -F _aptly aptly\n").unwrap();

        let archive = dir.path().join("aptly.tar.gz");
        let status = Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(dir.path())
            .arg("aptly-1.5.0")
            .status()
            .unwrap();
        assert!(status.success());

        let dest = dir.path().join("tree");
        unpack_archive(&archive, &dest, &TaskLogger::new()).unwrap();
        assert!(dest.join("completion.d/aptly").is_file());
    }

    #[test]
    fn test_head_version_without_git_history() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(head_version(&dir.path().join("missing")), "HEAD");
    }

    #[test]
    fn test_unpack_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("garbage.tar.gz");
        fs::write(&archive, b"not an archive").unwrap();

        let result = unpack_archive(&archive, &dir.path().join("tree"), &TaskLogger::new());
        assert!(matches!(result, Err(BuildError::Fetch(_))));
    }
}
