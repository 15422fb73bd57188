//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Compile-and-cache engine for script and stylesheet sources
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: webresource.toml)
    #[arg(
        short = 'C',
        long,
        global = true,
        default_value = "webresource.toml",
        value_hint = clap::ValueHint::FilePath
    )]
    pub config: PathBuf,

    /// Store directory (overrides `[store].root`)
    #[arg(short, long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub store: Option<PathBuf>,

    /// Print debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Keep every group compiled: periodic sweeps, subtree watches, workers
    #[command(visible_alias = "s")]
    Serve {
        /// Worker threads (overrides `[scheduler].workers`)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Compile one source and print the artifact
    #[command(visible_alias = "c")]
    Compile {
        /// Store path of the source, e.g. /apps/site/main.coffee
        path: String,
    },

    /// Compile a group and print its artifact paths
    #[command(visible_alias = "g")]
    Group {
        /// Group name
        name: String,

        /// List member artifacts instead of consolidated outputs
        #[arg(long)]
        split: bool,
    },

    /// Run one sweep and compile whatever changed
    Sweep,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_command() {
        let cli = Cli::parse_from(["webresource", "-v", "group", "site", "--split"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("webresource.toml"));
        assert!(matches!(
            cli.command,
            Commands::Group { ref name, split: true } if name == "site"
        ));
    }

    #[test]
    fn test_global_args_after_subcommand() {
        let cli = Cli::parse_from(["webresource", "serve", "-C", "etc/wr.toml", "-w", "8"]);
        assert_eq!(cli.config, PathBuf::from("etc/wr.toml"));
        assert!(matches!(cli.command, Commands::Serve { workers: Some(8) }));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
