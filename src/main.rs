use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use satrelay::cli::{
    Cli, Command, run_decode_command, run_doctor_command, run_encode_command, run_relay_command,
    run_route_command, run_split_command,
};
use satrelay::config::Config;

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        None | Some(Command::Run) => run_relay_command(Config::from_env()?, false).await,
        Some(Command::Once) => run_relay_command(Config::from_env()?, true).await,
        Some(Command::Encode { ref file, budget }) => run_encode_command(file, budget),
        Some(Command::Decode {
            ref file,
            ref output,
        }) => run_decode_command(file, output.as_deref()),
        Some(Command::Split {
            ref text,
            max_chars,
            cost,
            balance,
        }) => run_split_command(text, max_chars, cost, balance),
        Some(Command::Route {
            ref input,
            ref fallback,
        }) => run_route_command(input, fallback.clone()),
        Some(Command::Doctor) => run_doctor_command().await,
    }
}
