use std::{collections::HashSet, sync::LazyLock};

use fbuild_meta::{bottle::ALL_TAG, checksum::is_sha256_hex, Platform};
use regex::Regex;
use serde_yml::{Mapping, Value};

use crate::{error::Severity, LintContext};

pub const VALID_SHELLS: [&str; 3] = ["bash", "zsh", "fish"];
pub const ARCHIVE_SCHEMES: [&str; 3] = ["http", "https", "file"];
pub const HEAD_SCHEMES: [&str; 5] = ["http", "https", "git", "ssh", "file"];

static VERSION_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_./-]*\.[A-Za-z_][A-Za-z0-9_]*$").unwrap());

pub enum FieldType {
    String,
    Version,
    Url,
    Sha256,
    StringArray,
    Head,
    Build,
    Completions,
    Bottle,
    Test,
}

pub struct FieldValidator {
    pub name: &'static str,
    field_type: FieldType,
    pub required: bool,
}

impl FieldValidator {
    const fn new(name: &'static str, field_type: FieldType, required: bool) -> Self {
        Self {
            name,
            field_type,
            required,
        }
    }

    pub fn validate(&self, value: &Value, ctx: &mut LintContext, line_number: usize) {
        match &self.field_type {
            FieldType::String => {
                self.validate_string(self.name, value, ctx, line_number);
            }
            FieldType::Version => self.validate_version(value, ctx, line_number),
            FieldType::Url => {
                self.validate_url(self.name, value, &ARCHIVE_SCHEMES, ctx, line_number);
            }
            FieldType::Sha256 => self.validate_sha256(self.name, value, ctx, line_number),
            FieldType::StringArray => self.validate_string_array(value, ctx, line_number),
            FieldType::Head => self.validate_head(value, ctx, line_number),
            FieldType::Build => self.validate_build(value, ctx, line_number),
            FieldType::Completions => self.validate_completions(value, ctx, line_number),
            FieldType::Bottle => self.validate_bottle(value, ctx, line_number),
            FieldType::Test => self.validate_test(value, ctx, line_number),
        }
    }

    fn validate_string<'a>(
        &self,
        field: &str,
        value: &'a Value,
        ctx: &mut LintContext,
        line_number: usize,
    ) -> Option<&'a str> {
        match value.as_str() {
            Some(s) if !s.trim().is_empty() => Some(s),
            Some(_) => {
                ctx.record_error(
                    field,
                    format!("'{}' field cannot be empty", field),
                    line_number,
                    Severity::Error,
                );
                None
            }
            None => {
                ctx.record_error(
                    field,
                    format!("'{}' field must be a string", field),
                    line_number,
                    Severity::Error,
                );
                None
            }
        }
    }

    fn validate_version(&self, value: &Value, ctx: &mut LintContext, line_number: usize) {
        if let Some(version) = self.validate_string(self.name, value, ctx, line_number) {
            if version.chars().any(char::is_whitespace) {
                ctx.record_error(
                    self.name,
                    format!("'{}' must not contain whitespace", version),
                    line_number,
                    Severity::Error,
                );
            }
        }
    }

    fn validate_url(
        &self,
        field: &str,
        value: &Value,
        schemes: &[&str],
        ctx: &mut LintContext,
        line_number: usize,
    ) {
        let Some(raw) = self.validate_string(field, value, ctx, line_number) else {
            return;
        };
        if !is_valid_url(raw, schemes) {
            ctx.record_error(
                field,
                format!("'{}' is not a valid URL", raw),
                line_number,
                Severity::Error,
            );
        }
    }

    fn validate_sha256(
        &self,
        field: &str,
        value: &Value,
        ctx: &mut LintContext,
        line_number: usize,
    ) {
        let Some(sha) = self.validate_string(field, value, ctx, line_number) else {
            return;
        };
        if !is_sha256_hex(sha) {
            ctx.record_error(
                field,
                "must be 64 lowercase hexadecimal characters",
                line_number,
                Severity::Error,
            );
        }
    }

    fn validate_string_array(&self, value: &Value, ctx: &mut LintContext, line_number: usize) {
        let Some(arr) = value.as_sequence() else {
            ctx.record_error(
                self.name,
                format!("'{}' field must be an array", self.name),
                line_number,
                Severity::Error,
            );
            return;
        };

        let mut seen = HashSet::new();
        for item in arr {
            match item.as_str() {
                Some(s) if !s.trim().is_empty() => {
                    if !seen.insert(s) {
                        ctx.record_error(
                            self.name,
                            format!("duplicate entry '{}'", s),
                            line_number,
                            Severity::Warn,
                        );
                    }
                }
                _ => ctx.record_error(
                    self.name,
                    format!("'{}' field must only contain non-empty strings", self.name),
                    line_number,
                    Severity::Error,
                ),
            }
        }
    }

    fn validate_head(&self, value: &Value, ctx: &mut LintContext, line_number: usize) {
        let Some(map) = self.expect_mapping(value, ctx, line_number) else {
            return;
        };

        match map_get(map, "url") {
            Some(url) => self.validate_url("head.url", url, &HEAD_SCHEMES, ctx, line_number),
            None => ctx.record_error(
                "head",
                "Missing required 'url' field",
                line_number,
                Severity::Error,
            ),
        }
        if let Some(branch) = map_get(map, "branch") {
            self.validate_string("head.branch", branch, ctx, line_number);
        }
        warn_unknown_keys(map, "head", &["url", "branch"], ctx, line_number);
    }

    fn validate_build(&self, value: &Value, ctx: &mut LintContext, line_number: usize) {
        let Some(map) = self.expect_mapping(value, ctx, line_number) else {
            return;
        };

        if let Some(toolchain) = map_get(map, "toolchain") {
            self.validate_string("build.toolchain", toolchain, ctx, line_number);
        }
        if let Some(package) = map_get(map, "package") {
            self.validate_string("build.package", package, ctx, line_number);
        }
        for flag in ["generate", "strip"] {
            if let Some(v) = map_get(map, flag) {
                if !v.is_bool() {
                    ctx.record_error(
                        &format!("build.{}", flag),
                        format!("'{}' field must be a boolean", flag),
                        line_number,
                        Severity::Error,
                    );
                }
            }
        }
        if let Some(var) = map_get(map, "version_var") {
            if let Some(var) = self.validate_string("build.version_var", var, ctx, line_number) {
                if !VERSION_VAR.is_match(var) {
                    ctx.record_error(
                        "build.version_var",
                        format!("'{}' must look like 'package.Variable'", var),
                        line_number,
                        Severity::Error,
                    );
                }
            }
        }
        if let Some(env) = map_get(map, "env") {
            match env.as_mapping() {
                Some(env) => {
                    let env_line = ctx.line_for_key("env").unwrap_or(line_number);
                    for (key, val) in env {
                        match (key.as_str(), val) {
                            (Some(_), Value::String(_)) => {}
                            (Some(name), Value::Number(_) | Value::Bool(_)) => ctx.record_error(
                                "build.env",
                                format!("'{}' must be a quoted string", name),
                                env_line,
                                Severity::Error,
                            ),
                            _ => ctx.record_error(
                                "build.env",
                                "environment entries must be string pairs",
                                env_line,
                                Severity::Error,
                            ),
                        }
                    }
                }
                None => ctx.record_error(
                    "build.env",
                    "'env' field must be an object",
                    line_number,
                    Severity::Error,
                ),
            }
        }
        warn_unknown_keys(
            map,
            "build",
            &["toolchain", "generate", "version_var", "strip", "package", "env"],
            ctx,
            line_number,
        );
    }

    fn validate_completions(&self, value: &Value, ctx: &mut LintContext, line_number: usize) {
        let Some(items) = value.as_sequence() else {
            ctx.record_error(
                self.name,
                "Must be an array of completion scripts",
                line_number,
                Severity::Error,
            );
            return;
        };

        let mut installed = HashSet::new();
        for item in items {
            let Some(map) = item.as_mapping() else {
                ctx.record_error(
                    self.name,
                    "Each completion must be an object",
                    line_number,
                    Severity::Error,
                );
                continue;
            };

            let shell = match map_get(map, "shell").and_then(Value::as_str) {
                Some(shell) if VALID_SHELLS.contains(&shell) => Some(shell),
                Some(shell) => {
                    ctx.record_error(
                        "completions.shell",
                        format!(
                            "'{}' is not supported. Valid shells: {}",
                            shell,
                            VALID_SHELLS.join(", ")
                        ),
                        line_number,
                        Severity::Error,
                    );
                    None
                }
                None => {
                    ctx.record_error(
                        "completions",
                        "Missing required 'shell' field",
                        line_number,
                        Severity::Error,
                    );
                    None
                }
            };

            let path = match map_get(map, "path") {
                Some(path) => self.validate_string("completions.path", path, ctx, line_number),
                None => {
                    ctx.record_error(
                        "completions",
                        "Missing required 'path' field",
                        line_number,
                        Severity::Error,
                    );
                    None
                }
            };

            if let (Some(shell), Some(path)) = (shell, path) {
                if path.starts_with('/') || path.split('/').any(|c| c == "..") {
                    ctx.record_error(
                        "completions.path",
                        format!("'{}' must be relative to the source tree", path),
                        line_number,
                        Severity::Error,
                    );
                }
                let file_name = path.rsplit('/').next().unwrap_or(path);
                if !installed.insert((shell, file_name)) {
                    ctx.record_error(
                        "completions",
                        format!("'{}' is installed twice for {}", file_name, shell),
                        line_number,
                        Severity::Error,
                    );
                }
            }
        }
    }

    fn validate_bottle(&self, value: &Value, ctx: &mut LintContext, line_number: usize) {
        let Some(map) = self.expect_mapping(value, ctx, line_number) else {
            return;
        };

        if let Some(root_url) = map_get(map, "root_url") {
            self.validate_url("bottle.root_url", root_url, &["https", "http"], ctx, line_number);
        }
        if let Some(rebuild) = map_get(map, "rebuild") {
            if rebuild.as_u64().is_none() {
                ctx.record_error(
                    "bottle.rebuild",
                    "'rebuild' must be a non-negative integer",
                    line_number,
                    Severity::Error,
                );
            }
        }

        let Some(table) = map_get(map, "sha256").and_then(Value::as_mapping) else {
            ctx.record_error(
                "bottle.sha256",
                "Missing platform checksum table",
                line_number,
                Severity::Error,
            );
            return;
        };
        for (tag, sha) in table {
            let Some(tag) = tag.as_str() else {
                ctx.record_error(
                    "bottle.sha256",
                    "platform tags must be strings",
                    line_number,
                    Severity::Error,
                );
                continue;
            };
            let tag_line = ctx.line_for_key(tag).unwrap_or(line_number);
            if tag != ALL_TAG && Platform::from_tag(tag).is_err() {
                ctx.record_error(
                    &format!("bottle.sha256.{}", tag),
                    format!("'{}' is not a known platform tag", tag),
                    tag_line,
                    Severity::Warn,
                );
            }
            self.validate_sha256(&format!("bottle.sha256.{}", tag), sha, ctx, tag_line);
        }
        warn_unknown_keys(
            map,
            "bottle",
            &["root_url", "rebuild", "sha256"],
            ctx,
            line_number,
        );
    }

    fn validate_test(&self, value: &Value, ctx: &mut LintContext, line_number: usize) {
        let Some(map) = self.expect_mapping(value, ctx, line_number) else {
            return;
        };

        let known = ["version_marker", "config", "empty_mirrors_marker"];
        for key in known {
            if let Some(v) = map_get(map, key) {
                self.validate_string(&format!("test.{}", key), v, ctx, line_number);
            }
        }
        warn_unknown_keys(map, "test", &known, ctx, line_number);
    }

    fn expect_mapping<'a>(
        &self,
        value: &'a Value,
        ctx: &mut LintContext,
        line_number: usize,
    ) -> Option<&'a Mapping> {
        let map = value.as_mapping();
        if map.is_none() {
            ctx.record_error(
                self.name,
                format!("'{}' field must be an object", self.name),
                line_number,
                Severity::Error,
            );
        }
        map
    }
}

fn map_get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(&Value::String(key.to_string()))
}

fn warn_unknown_keys(
    map: &Mapping,
    parent: &str,
    known: &[&str],
    ctx: &mut LintContext,
    line_number: usize,
) {
    for key in map.keys() {
        let name = key.as_str().unwrap_or_default();
        if !known.contains(&name) {
            ctx.record_error(
                &format!("{}.{}", parent, name),
                "Unknown field. Ignored.",
                line_number,
                Severity::Warn,
            );
        }
    }
}

pub const FIELD_VALIDATORS: &[FieldValidator] = &[
    FieldValidator::new("name", FieldType::String, true),
    FieldValidator::new("desc", FieldType::String, false),
    FieldValidator::new("homepage", FieldType::Url, false),
    FieldValidator::new("license", FieldType::String, false),
    FieldValidator::new("version", FieldType::Version, true),
    FieldValidator::new("url", FieldType::Url, true),
    FieldValidator::new("sha256", FieldType::Sha256, true),
    FieldValidator::new("head", FieldType::Head, false),
    FieldValidator::new("build_dependencies", FieldType::StringArray, false),
    FieldValidator::new("build", FieldType::Build, false),
    FieldValidator::new("completions", FieldType::Completions, false),
    FieldValidator::new("bottle", FieldType::Bottle, false),
    FieldValidator::new("test", FieldType::Test, false),
];

pub fn is_valid_url(value: &str, schemes: &[&str]) -> bool {
    match url::Url::parse(value) {
        Ok(parsed) => {
            schemes.contains(&parsed.scheme())
                && (parsed.scheme() == "file" || parsed.host_str().is_some_and(|h| !h.is_empty()))
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_url() {
        assert!(is_valid_url(
            "https://github.com/aptly-dev/aptly/archive/refs/tags/v1.5.0.tar.gz",
            &ARCHIVE_SCHEMES
        ));
        assert!(is_valid_url("file:///tmp/aptly.tar.gz", &ARCHIVE_SCHEMES));
        assert!(!is_valid_url("ftp://example.com/a.tar.gz", &ARCHIVE_SCHEMES));
        assert!(!is_valid_url("not a url", &ARCHIVE_SCHEMES));
        assert!(is_valid_url("git://example.com/repo.git", &HEAD_SCHEMES));
    }

    #[test]
    fn test_version_var_pattern() {
        assert!(VERSION_VAR.is_match("main.Version"));
        assert!(VERSION_VAR.is_match("github.com/aptly-dev/aptly/aptly.Version"));
        assert!(!VERSION_VAR.is_match("Version"));
        assert!(!VERSION_VAR.is_match("main.Version=1"));
    }
}
