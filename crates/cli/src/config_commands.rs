use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use hikari_config::{
    HikariConfig,
    validate::{self, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration as JSON.
    Show,
    /// Print where the config file and extension data live.
    Paths,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
        ConfigAction::Show => {
            let config = load(path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
        ConfigAction::Paths => {
            let config = load(path)?;
            match path
                .map(Path::to_path_buf)
                .or_else(hikari_config::find_config_file)
            {
                Some(file) => println!("Config: {}", file.display()),
                None => println!("Config: (none, using defaults)"),
            }
            if let Some(dir) = hikari_config::config_dir() {
                println!("Config dir: {}", dir.display());
            }
            println!("Data dir: {}", hikari_config::data_dir(&config).display());
            Ok(())
        },
    }
}

fn load(path: Option<&Path>) -> Result<HikariConfig> {
    match path {
        Some(path) => hikari_config::load_config(path),
        None => Ok(hikari_config::discover_and_load()),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
