//! Shipyard - provision container hosts and bootstrap registry trust

use clap::Parser;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::filter::LevelFilter;

use shipyard_cli::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(LevelFilter::from(cli.log_level))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to set global default tracing subscriber: {e}");
        std::process::exit(1);
    }

    if let Err(e) = cli.run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
