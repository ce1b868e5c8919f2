use clap::Parser;
use glicko_processor::{
    args::Args,
    database::db::DbClient,
    model::scheduler::{Scheduler, SchedulerConfig}
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = DbClient::connect(&args.connection_string)
        .await
        .expect("Expected valid database connection");

    let mut scheduler = Scheduler::new(client, SchedulerConfig { gamma: args.gamma });

    match scheduler.run().await {
        Ok(summary) => info!(
            persisted = summary.matches_persisted,
            passed_through = summary.matches_passed_through,
            skipped = summary.matches_skipped,
            players_rated = summary.players_rated,
            "processor finished"
        ),
        Err(err) => {
            error!(%err, "processor run failed");
            std::process::exit(1);
        }
    }
}
