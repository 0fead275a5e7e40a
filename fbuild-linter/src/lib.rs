use std::{collections::HashSet, fmt::Display, fs, path::Path};

use error::{highlight_error_line, ErrorDetails, Severity};
use fbuild_meta::Formula;
use serde_yml::Value;
use validator::FIELD_VALIDATORS;

pub mod error;
pub mod validator;

/// Diagnostics collected while walking a formula document
pub struct LintContext {
    pub yaml_str: String,
    pub visited: HashSet<String>,
    pub errors: Vec<ErrorDetails>,
}

impl LintContext {
    fn new(yaml_str: &str) -> Self {
        Self {
            yaml_str: yaml_str.to_string(),
            visited: HashSet::new(),
            errors: Vec::new(),
        }
    }

    pub fn record_error(
        &mut self,
        field: &str,
        message: impl Into<String>,
        line_number: usize,
        severity: Severity,
    ) {
        self.errors.push(ErrorDetails {
            field: field.to_string(),
            message: message.into(),
            line_number,
            severity,
        });
    }

    /// 1-based line of the first `key:` entry, if any
    pub fn line_for_key(&self, key: &str) -> Option<usize> {
        get_line_number_for_key(&self.yaml_str, key)
    }
}

/// Outcome of linting one formula
pub struct LintReport {
    pub source: String,
    pub diagnostics: Vec<ErrorDetails>,
    pub formula: Option<Formula>,
}

impl LintReport {
    pub fn is_ok(&self) -> bool {
        self.formula.is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ErrorDetails> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ErrorDetails> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warn)
    }

    /// Diagnostics with their source context, ready to print
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for diagnostic in &self.diagnostics {
            lines.push(diagnostic.to_string());
            lines.extend(highlight_error_line(
                &self.source,
                diagnostic.line_number,
                diagnostic.severity == Severity::Error,
            ));
        }
        lines
    }
}

#[derive(Default)]
pub struct Linter;

impl Linter {
    pub fn new() -> Self {
        Linter
    }

    /// Lint a formula file. Only I/O problems are returned as `Err`.
    pub fn lint<P: AsRef<Path>>(&self, file_path: P) -> Result<LintReport, FileError> {
        let file_path = file_path.as_ref();
        let yaml_str = fs::read_to_string(file_path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound(file_path.display().to_string()),
            _ => FileError::InvalidFile(file_path.display().to_string()),
        })?;

        tracing::debug!("Linting {}", file_path.display());
        Ok(self.lint_str(&yaml_str))
    }

    pub fn lint_str(&self, yaml_str: &str) -> LintReport {
        let mut ctx = LintContext::new(yaml_str);

        match serde_yml::from_str::<Value>(yaml_str) {
            Ok(Value::Mapping(map)) => {
                for (key, value) in &map {
                    let Some(key) = key.as_str() else {
                        ctx.record_error("<root>", "keys must be strings", 0, Severity::Error);
                        continue;
                    };
                    let line_number = ctx.line_for_key(key).unwrap_or(0);

                    ctx.visited.insert(key.to_string());

                    match FIELD_VALIDATORS.iter().find(|v| v.name == key) {
                        Some(validator) => validator.validate(value, &mut ctx, line_number),
                        None => ctx.record_error(
                            key,
                            "Unknown field. Ignored.",
                            line_number,
                            Severity::Warn,
                        ),
                    }
                }

                for validator in FIELD_VALIDATORS.iter().filter(|v| v.required) {
                    if !ctx.visited.contains(validator.name) {
                        ctx.record_error(
                            validator.name,
                            format!("'{}' is a mandatory field.", validator.name),
                            0,
                            Severity::Error,
                        );
                    }
                }

                self.check_consistency(&map, &mut ctx);
            }
            Ok(_) => ctx.record_error(
                "<root>",
                "formula must be a YAML mapping",
                0,
                Severity::Error,
            ),
            Err(err) => ctx.record_error(
                "<root>",
                format!("invalid YAML: {}", err),
                err.location().map(|l| l.line()).unwrap_or(0),
                Severity::Error,
            ),
        }

        let has_errors = ctx.errors.iter().any(|e| e.severity == Severity::Error);
        let formula = if has_errors {
            None
        } else {
            match Formula::from_yaml(yaml_str) {
                Ok(formula) => Some(formula),
                Err(err) => {
                    ctx.record_error("<root>", err.to_string(), 0, Severity::Error);
                    None
                }
            }
        };

        LintReport {
            source: ctx.yaml_str,
            diagnostics: ctx.errors,
            formula,
        }
    }

    fn check_consistency(&self, map: &serde_yml::Mapping, ctx: &mut LintContext) {
        let generate = map
            .get(&Value::String("build".into()))
            .and_then(|b| b.get("generate"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let has_head = map.contains_key(&Value::String("head".into()));

        if generate && !has_head {
            let line = ctx.line_for_key("generate").unwrap_or(0);
            ctx.record_error(
                "build.generate",
                "generation only runs for development builds, but no 'head' is declared",
                line,
                Severity::Warn,
            );
        }
    }
}

#[derive(Debug)]
pub enum FileError {
    InvalidFile(String),
    NotFound(String),
}

impl Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileError::InvalidFile(fp) => {
                write!(f, "Invalid file {}. Please provide a valid YAML file.", fp)
            }
            FileError::NotFound(fp) => write!(f, "File {} not found.", fp),
        }
    }
}

impl std::error::Error for FileError {}

fn get_line_number_for_key(yaml_str: &str, key: &str) -> Option<usize> {
    let needle = format!("{}:", key);
    let quoted = format!("\"{}\":", key);
    yaml_str
        .lines()
        .position(|line| {
            let trimmed = line.trim_start().trim_start_matches("- ");
            trimmed.starts_with(&needle) || trimmed.starts_with(&quoted)
        })
        .map(|index| index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"name: aptly
desc: "Swiss army knife for Debian repository management"
homepage: "https://www.aptly.info/"
license: "MIT"
version: "1.5.0"
url: "https://github.com/aptly-dev/aptly/archive/refs/tags/v1.5.0.tar.gz"
sha256: "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
head:
  url: "https://github.com/aptly-dev/aptly.git"
  branch: "master"
build:
  generate: true
  version_var: "main.Version"
completions:
  - shell: bash
    path: "completion.d/aptly"
bottle:
  root_url: "https://ghcr.io/v2/homebrew/core"
  sha256:
    arm64_sequoia: "1111111111111111111111111111111111111111111111111111111111111111"
    x86_64_linux: "2222222222222222222222222222222222222222222222222222222222222222"
"#;

    fn fields(report: &LintReport, severity: Severity) -> Vec<String> {
        report
            .diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.field.clone())
            .collect()
    }

    #[test]
    fn test_valid_formula() {
        let report = Linter::new().lint_str(VALID);
        assert!(report.is_ok(), "{:?}", report.diagnostics);
        assert_eq!(report.errors().count(), 0);
        assert_eq!(report.warnings().count(), 0);
        assert_eq!(report.formula.unwrap().name, "aptly");
    }

    #[test]
    fn test_bad_sha256_is_an_error_with_line() {
        let yaml = VALID.replace(
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
            "not-a-digest",
        );
        let report = Linter::new().lint_str(&yaml);
        assert!(!report.is_ok());
        let error = report.errors().next().unwrap();
        assert_eq!(error.field, "sha256");
        assert_eq!(error.line_number, 7);
    }

    #[test]
    fn test_missing_required_fields() {
        let report = Linter::new().lint_str("name: aptly\n");
        let errors = fields(&report, Severity::Error);
        assert!(errors.contains(&"version".to_string()));
        assert!(errors.contains(&"url".to_string()));
        assert!(errors.contains(&"sha256".to_string()));
        assert!(report.formula.is_none());
    }

    #[test]
    fn test_unknown_shell_and_tag() {
        let yaml = VALID
            .replace("shell: bash", "shell: powershell")
            .replace("x86_64_linux:", "riscv64_linux:");
        let report = Linter::new().lint_str(&yaml);
        assert!(fields(&report, Severity::Error).contains(&"completions.shell".to_string()));
        assert!(fields(&report, Severity::Warn).contains(&"bottle.sha256.riscv64_linux".to_string()));
    }

    #[test]
    fn test_version_with_whitespace() {
        let yaml = VALID.replace("version: \"1.5.0\"", "version: \"1.5.0 beta\"");
        let report = Linter::new().lint_str(&yaml);
        assert_eq!(fields(&report, Severity::Error), vec!["version".to_string()]);
    }

    #[test]
    fn test_generate_without_head_warns() {
        let yaml = VALID.replace(
            "head:\n  url: \"https://github.com/aptly-dev/aptly.git\"\n  branch: \"master\"\n",
            "",
        );
        let report = Linter::new().lint_str(&yaml);
        assert!(report.is_ok());
        assert_eq!(fields(&report, Severity::Warn), vec!["build.generate".to_string()]);
    }

    #[test]
    fn test_unknown_top_level_field_warns() {
        let yaml = format!("{}caveats: \"none\"\n", VALID);
        let report = Linter::new().lint_str(&yaml);
        assert!(report.is_ok());
        assert_eq!(fields(&report, Severity::Warn), vec!["caveats".to_string()]);
    }

    #[test]
    fn test_invalid_yaml() {
        let report = Linter::new().lint_str("name: [unclosed\n");
        assert!(!report.is_ok());
        assert_eq!(fields(&report, Severity::Error), vec!["<root>".to_string()]);
    }

    #[test]
    fn test_duplicated_key_is_a_parse_error() {
        let yaml = format!("{}name: aptly2\n", VALID);
        let report = Linter::new().lint_str(&yaml);
        assert!(!report.is_ok());
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "<root>");
        assert!(errors[0].message.starts_with("invalid YAML"));
        assert!(errors[0].message.contains("duplicate entry"));
    }

    #[test]
    fn test_numeric_env_value_is_rejected_at_its_line() {
        let yaml = VALID.replace(
            "  version_var: \"main.Version\"\n",
            "  version_var: \"main.Version\"\n  env:\n    CGO_ENABLED: 0\n",
        );
        let report = Linter::new().lint_str(&yaml);
        assert!(!report.is_ok());
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "build.env");
        assert_eq!(errors[0].line_number, 14);
        assert!(errors[0].message.contains("CGO_ENABLED"));

        let quoted = yaml.replace("CGO_ENABLED: 0", "CGO_ENABLED: \"0\"");
        let report = Linter::new().lint_str(&quoted);
        assert!(report.is_ok(), "{:?}", report.diagnostics);
        let formula = report.formula.unwrap();
        assert_eq!(formula.build.env.get("CGO_ENABLED").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_url_without_scheme_is_rejected() {
        let yaml = VALID.replace(
            "https://github.com/aptly-dev/aptly/archive/refs/tags/v1.5.0.tar.gz",
            "/srv/archives/aptly-1.5.0.tar.gz",
        );
        let report = Linter::new().lint_str(&yaml);
        assert_eq!(fields(&report, Severity::Error), vec!["url".to_string()]);

        let yaml = yaml.replace("\"/srv/", "\"file:///srv/");
        assert!(Linter::new().lint_str(&yaml).is_ok());
    }

    #[test]
    fn test_lint_missing_file() {
        let err = Linter::new().lint("/nonexistent/fbuild/aptly.yaml").err().unwrap();
        assert!(matches!(err, FileError::NotFound(_)));
    }

    #[test]
    fn test_lint_file_and_render() {
        colored::control::set_override(false);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aptly.yaml");
        std::fs::write(&path, VALID.replace("license: \"MIT\"", "license: \"\"")).unwrap();

        let report = Linter::new().lint(&path).unwrap();
        let rendered = report.render();
        assert!(rendered[0].contains("license"));
        assert!(rendered.iter().any(|l| l.starts_with("--> 4: license")));
    }
}
