//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the relay loop (`run`) or a single inbox scan (`once`)
//! - Encoding a file into envelopes and decoding them back (`encode`, `decode`)
//! - Splitting an answer into `[i/n]` fragments (`split`)
//! - Showing the delivery channel for a reply link (`route`)
//! - Checking configuration health (`doctor`)

mod codec;
mod doctor;
mod relay;
mod route;

pub use codec::{run_decode_command, run_encode_command, run_split_command};
pub use doctor::run_doctor_command;
pub use relay::{Relay, build_relay, run_relay_command};
pub use route::run_route_command;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(name = "satrelay")]
#[command(about = "Relay weather files and AI answers to satellite messengers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "satrelay=info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan the inbox every CHECK_INTERVAL_SECS (default if no subcommand given)
    Run,

    /// Scan the inbox once and exit
    Once,

    /// Encode a file into `msg i/n:` envelopes
    Encode {
        file: PathBuf,

        /// Maximum characters per envelope
        #[arg(long, default_value_t = 120)]
        budget: usize,
    },

    /// Reassemble a file from envelopes pasted into a text file
    Decode {
        file: PathBuf,

        /// Write the artifact here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Split an answer into `[i/n]` fragments
    Split {
        text: String,

        /// Maximum characters per fragment
        #[arg(long, default_value_t = 120)]
        max_chars: usize,

        /// Charge this cost and add the footer
        #[arg(long)]
        cost: Option<Decimal>,

        /// Balance before the charge
        #[arg(long, default_value = "5.00")]
        balance: Decimal,
    },

    /// Show which channel a reply link is delivered through
    Route {
        /// Reply link, address, or pasted device message
        input: String,

        /// Address used when the primary channel fails
        #[arg(long)]
        fallback: Option<String>,
    },

    /// Run diagnostics
    Doctor,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parse_no_args() {
        let cli = Cli::try_parse_from(["satrelay"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.json_logs);
        assert_eq!(cli.log_level, "satrelay=info");
    }

    #[test]
    fn parse_json_logs_after_subcommand() {
        let cli = Cli::try_parse_from(["satrelay", "once", "--json-logs"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Some(Command::Once)));
    }

    #[test]
    fn parse_encode_budget() {
        let cli = Cli::try_parse_from(["satrelay", "encode", "gfs.grb", "--budget", "160"]).unwrap();
        match cli.command {
            Some(Command::Encode { file, budget }) => {
                assert_eq!(file, PathBuf::from("gfs.grb"));
                assert_eq!(budget, 160);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_split_cost() {
        let cli = Cli::try_parse_from(["satrelay", "split", "hello there", "--cost", "0.0123"]).unwrap();
        match cli.command {
            Some(Command::Split {
                cost, balance, max_chars, ..
            }) => {
                assert_eq!(cost, Some(dec!(0.0123)));
                assert_eq!(balance, dec!(5.00));
                assert_eq!(max_chars, 120);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_route_fallback() {
        let cli = Cli::try_parse_from([
            "satrelay",
            "route",
            "https://inreachlink.com/AbC123",
            "--fallback",
            "skipper@example.org",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Route { input, fallback }) => {
                assert_eq!(input, "https://inreachlink.com/AbC123");
                assert_eq!(fallback.as_deref(), Some("skipper@example.org"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn command_doctor_variant() {
        let cli = Cli::try_parse_from(["satrelay", "doctor"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Doctor)));
    }
}
