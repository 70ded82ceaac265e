use std::path::PathBuf;

use clap::Parser;
use jira_vault::cli::{self, Cli};
use jira_vault::logging;

fn main() {
    let cli = Cli::parse();

    load_env_files(cli.env.as_deref());

    if let Err(err) = cli::run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

/// .env layering: the working-directory file overrides the process
/// environment, the user-level file only fills gaps, and an explicit
/// `--env` file wins over both.
fn load_env_files(explicit: Option<&std::path::Path>) {
    let _ = dotenvy::dotenv_override();

    if let Some(home) = std::env::var_os("HOME") {
        let fallback = PathBuf::from(home)
            .join(".config")
            .join("jira-vault")
            .join(".env");
        if fallback.exists() {
            let _ = dotenvy::from_path(&fallback);
        }
    }

    if let Some(path) = explicit {
        if let Err(err) = dotenvy::from_path_override(path) {
            logging::error(format!("failed to load env file {}: {err}", path.display()));
            std::process::exit(1);
        }
    }
}
