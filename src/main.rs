//! Marquee - movie catalog and recommendation backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use marquee::{
    config::Args,
    db::{ConnectionManager, EventSink, MongoClient, MongoConnector, MongoMovieRepository, MongoUserRepository},
    lifecycle::{spawn_signal_listener, Lifecycle, EXIT_FAILURE},
    logging::init_tracing,
    services::TmdbClient,
    AppState, MarqueeError,
};

async fn build_state(
    args: Args,
    client: MongoClient,
    events: EventSink,
) -> Result<AppState, MarqueeError> {
    let users = MongoUserRepository::new(&client).await?;
    let movies = MongoMovieRepository::new(&client).await?;
    let search = TmdbClient::new(args.tmdb_base_url.clone(), args.tmdb_api_key.clone());
    if !search.is_configured() {
        info!("TMDB_API_KEY not set, movie search will return 503");
    }

    AppState::new(
        args,
        Arc::new(users),
        Arc::new(movies),
        Arc::new(search),
        events,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_tracing(&args.log_level, &args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(EXIT_FAILURE);
    }

    info!("======================================");
    info!("  Marquee - movie catalog backend");
    info!("======================================");
    info!("Listen: {}", args.listen_addr());
    info!("Environment: {}", args.app_env);
    info!("Database: {}", args.mongo_db);
    info!(
        "Store retries: {} x {}ms",
        args.db_connect_retries, args.db_retry_delay_ms
    );
    info!("Token lifetime: {}s", args.jwt_expires_in.as_secs());
    info!("Drain timeout: {}s", args.drain_timeout_secs);
    info!("======================================");

    let manager = ConnectionManager::new(MongoConnector::new(&args.mongo_db), args.retry_policy());
    let lifecycle = Lifecycle::new(args.clone(), manager);
    spawn_signal_listener(lifecycle.shutdown_handle());

    let exit_code = lifecycle
        .run(move |client, events| build_state(args, client, events))
        .await;

    std::process::exit(exit_code);
}
