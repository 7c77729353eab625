//! The host's command-line surface (spec.md §1's "external collaborator").
//! Deliberately small: this crate's library is the deliverable, not a
//! preset-manager GUI or a daemon supervisor, so the CLI only runs the
//! engine against one device and validates a mapping file — grounded on the
//! shape of the teacher's `Cli`/`Commands` (`clap` derive, a
//! `generate_completion` helper) without the parts that belong to a preset
//! GUI (session management, IPC, interactive toggling).

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser)]
#[command(name = "keymux")]
#[command(about = "Combination recognizer and macro engine for Linux input devices")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Grab a device and run the mapping file against it.
    Run {
        /// Path to the physical input device, e.g. /dev/input/event4.
        device: PathBuf,
        /// Path to the RON mapping file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Grab every device listed in a TOML settings file, each on its own
    /// event loop. Defaults to `$XDG_CONFIG_HOME/keymux/settings.toml`.
    RunAll {
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
    /// Parse and resolve a mapping file without opening any device.
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print a shell completion script to stdout.
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn generate_completion(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

pub fn print_help() {
    let _ = Cli::command().print_help();
    println!();
}
