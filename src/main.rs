use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fire_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = fire_sim::api::Cli::parse();
    if let Err(e) = fire_sim::api::run_cli(cli).await {
        tracing::error!(error = %e, "fire-sim failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
