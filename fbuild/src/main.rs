use std::{
    io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use fbuild::{
    install, logger::TaskLogger, verify, BuildError, Builder, InstallLayout, Provenance, Result,
    Toolchain,
};
use fbuild_linter::Linter;
use fbuild_meta::{compute_checksums, formula_paths, Formula, Platform};

static CHECK_MARK: LazyLock<colored::ColoredString> = LazyLock::new(|| "✔".bright_green().bold());
static CROSS_MARK: LazyLock<colored::ColoredString> = LazyLock::new(|| "〤".bright_red().bold());
static WARN: LazyLock<colored::ColoredString> = LazyLock::new(|| "⚠️".bright_yellow().bold());

#[derive(Parser)]
#[command(name = "fbuild")]
#[command(about = "Build, install and smoke-test formula packages", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a formula from source and install it
    Install {
        /// Path to the formula file
        formula: PathBuf,

        /// Installation prefix
        #[arg(short, long, env = "FBUILD_PREFIX")]
        prefix: PathBuf,

        /// Build the development branch instead of the release archive
        #[arg(long)]
        head: bool,

        /// Keep the working directory after a successful build
        #[arg(long)]
        keep: bool,

        /// Skip the smoke test after installing
        #[arg(long)]
        no_verify: bool,
    },

    /// Run the smoke test against an installed formula
    Test {
        /// Path to the formula file
        formula: PathBuf,

        /// Installation prefix
        #[arg(short, long, env = "FBUILD_PREFIX")]
        prefix: PathBuf,

        /// Version the installed binary must report (defaults to the formula version)
        #[arg(long)]
        version: Option<String>,
    },

    /// Remove an installed formula's binary and completions
    Uninstall {
        /// Path to the formula file
        formula: PathBuf,

        /// Installation prefix
        #[arg(short, long, env = "FBUILD_PREFIX")]
        prefix: PathBuf,
    },

    /// Lint formula files or directories of formulas
    Lint {
        #[arg(required = true, num_args = 1..)]
        paths: Vec<PathBuf>,
    },

    /// Show the bottle matching a platform
    Bottle {
        /// Path to the formula file
        formula: PathBuf,

        /// Platform tag (e.g. arm64_sonoma, x86_64_linux); detected when omitted
        #[arg(short, long)]
        tag: Option<String>,

        /// Print the bottle as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print sha256 and b3sum of files
    Checksum {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
    },
}

fn setup_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("[{}] Failed to set tracing subscriber", &*WARN);
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Install {
            formula,
            prefix,
            head,
            keep,
            no_verify,
        } => cmd_install(&formula, prefix, head, keep, no_verify).await,
        Commands::Test {
            formula,
            prefix,
            version,
        } => cmd_test(&formula, prefix, version),
        Commands::Uninstall { formula, prefix } => cmd_uninstall(&formula, prefix),
        Commands::Lint { paths } => cmd_lint(&paths),
        Commands::Bottle { formula, tag, json } => cmd_bottle(&formula, tag, json),
        Commands::Checksum { files } => cmd_checksum(&files),
    };

    if let Err(err) = result {
        eprintln!("[{}] {}", &*CROSS_MARK, err);
        std::process::exit(1);
    }
}

fn formula_error(msg: String) -> BuildError {
    BuildError::Formula(fbuild_meta::Error::Formula(msg))
}

/// Lint and print diagnostics; returns the formula only if it is clean
fn lint_formula(path: &Path) -> Result<Formula> {
    let report = Linter::new()
        .lint(path)
        .map_err(|e| formula_error(e.to_string()))?;

    for line in report.render() {
        eprintln!("{}", line);
    }

    let errors = report.errors().count();
    report.formula.ok_or_else(|| {
        formula_error(format!(
            "{} has {} error(s)",
            path.display(),
            errors
        ))
    })
}

async fn cmd_install(
    path: &Path,
    prefix: PathBuf,
    head: bool,
    keep: bool,
    no_verify: bool,
) -> Result<()> {
    let formula = lint_formula(path)?;
    let provenance = if head {
        if formula.head.is_none() {
            return Err(formula_error(format!(
                "{} declares no development branch",
                formula.name
            )));
        }
        Provenance::DevelopmentBranch
    } else {
        Provenance::ReleaseArchive
    };

    let toolchain = Toolchain::locate(&formula.build)?;
    let builder = Builder::new(formula, toolchain, InstallLayout::new(prefix))
        .verify(!no_verify)
        .keep(keep);

    let report = builder.run(provenance).await?;

    println!(
        "[{}] {} {} installed from {}",
        &*CHECK_MARK, report.name, report.version, report.provenance
    );
    for path in report.installed.paths() {
        println!("    {}", path.display());
    }
    if report.verified.is_some() {
        println!("[{}] Smoke test passed", &*CHECK_MARK);
    } else {
        println!("[{}] Smoke test skipped", &*WARN);
    }
    if let Some(workdir) = report.workdir {
        println!("    working directory: {}", workdir.display());
    }
    Ok(())
}

fn cmd_test(path: &Path, prefix: PathBuf, version: Option<String>) -> Result<()> {
    let formula = lint_formula(path)?;
    let layout = InstallLayout::new(prefix);
    let binary = layout.binary_path(&formula.name);
    if !binary.is_file() {
        return Err(BuildError::VerificationFailed(format!(
            "{} is not installed in {}",
            formula.name,
            layout.prefix().display()
        )));
    }

    let version = version.unwrap_or_else(|| formula.version.clone());
    verify::verify(&binary, &formula.test, &version, &TaskLogger::new())?;
    println!("[{}] {} {} passed", &*CHECK_MARK, formula.name, version);
    Ok(())
}

fn cmd_uninstall(path: &Path, prefix: PathBuf) -> Result<()> {
    let formula = Formula::from_file(path)?;
    let removed = install::uninstall(&formula, &InstallLayout::new(prefix), &TaskLogger::new())?;
    if removed.is_empty() {
        println!("[{}] {} was not installed", &*WARN, formula.name);
    } else {
        println!(
            "[{}] Removed {} file(s) of {}",
            &*CHECK_MARK,
            removed.len(),
            formula.name
        );
    }
    Ok(())
}

fn collect_formula_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(formula_paths(path)?);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn cmd_lint(paths: &[PathBuf]) -> Result<()> {
    let linter = Linter::new();
    let files = collect_formula_files(paths)?;
    let mut failed = 0;

    for file in &files {
        match linter.lint(file) {
            Ok(report) => {
                for line in report.render() {
                    eprintln!("{}", line);
                }
                let warnings = report.warnings().count();
                if report.is_ok() {
                    println!(
                        "[{}] {} ({} warning(s))",
                        &*CHECK_MARK,
                        file.display(),
                        warnings
                    );
                } else {
                    failed += 1;
                    eprintln!("[{}] {}", &*CROSS_MARK, file.display());
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("[{}] {}", &*CROSS_MARK, e);
            }
        }
    }

    if failed > 0 {
        return Err(formula_error(format!(
            "{} of {} formula(s) failed linting",
            failed,
            files.len()
        )));
    }
    Ok(())
}

fn cmd_bottle(path: &Path, tag: Option<String>, json: bool) -> Result<()> {
    let formula = Formula::from_file(path)?;
    let platform = match tag {
        Some(tag) => Platform::from_tag(&tag)?,
        None => Platform::detect()
            .ok_or_else(|| formula_error("unsupported host platform".into()))?,
    };

    let bottle = formula.bottle_for(&platform).ok_or_else(|| {
        formula_error(format!(
            "{} has no bottle for {}",
            formula.name, platform
        ))
    })?;

    if json {
        let out = serde_json::to_string_pretty(&bottle)
            .map_err(|e| BuildError::Io(io::Error::other(e)))?;
        println!("{}", out);
    } else {
        println!("[{}] {} for {}", &*CHECK_MARK, bottle.file_name(), platform);
        println!("    tag:    {}", bottle.tag);
        println!("    sha256: {}", bottle.sha256);
        if let Some(url) = bottle.url {
            println!("    url:    {}", url);
        }
    }
    Ok(())
}

fn cmd_checksum(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let checksums = compute_checksums(file)?;
        println!(
            "{}  {}  {}",
            checksums.sha256,
            checksums.b3sum,
            file.display()
        );
    }
    Ok(())
}
