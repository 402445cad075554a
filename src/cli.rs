//! CLI argument parsing for the routefinder-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "routefinder-worker", about = "Delivery route planning worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Plan a single request from a JSON file and print the routes
    Plan {
        /// Request payload (loosePackages, bags, drivers, mode)
        #[arg(long)]
        input: PathBuf,
        /// Fixed random seed for reproducible plans
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["routefinder-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_serve_command_parses() {
        let cli = Cli::parse_from(["routefinder-worker", "serve"]);
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn test_cli_plan_command_parses() {
        let cli = Cli::parse_from(["routefinder-worker", "plan", "--input", "request.json", "--seed", "42"]);
        match cli.command {
            Some(Command::Plan { input, seed }) => {
                assert_eq!(input, PathBuf::from("request.json"));
                assert_eq!(seed, Some(42));
            }
            _ => panic!("expected plan command"),
        }
    }

    #[test]
    fn test_cli_plan_requires_input() {
        assert!(Cli::try_parse_from(["routefinder-worker", "plan"]).is_err());
    }
}
