//! Marquee seed tool
//!
//! Replaces the movie collection with a small sample catalog.

use clap::Parser;
use tracing::{error, info};

use marquee::{
    config::Args,
    db::{
        schemas::MovieDoc, ConnectionManager, MongoConnector, MongoMovieRepository,
        MovieRepository,
    },
    logging::init_tracing,
};

fn sample_movies() -> Vec<MovieDoc> {
    vec![
        MovieDoc::new(
            "The Discovery".into(),
            "A scientist proves the afterlife exists, and the world is never the same.".into(),
            Some(2020),
            Some(6.3),
        ),
        MovieDoc::new(
            "Inception".into(),
            "A thief who steals corporate secrets through dream-sharing technology.".into(),
            Some(2010),
            Some(8.8),
        ),
        MovieDoc::new(
            "The Shawshank Redemption".into(),
            "Two imprisoned men bond over a number of years.".into(),
            Some(1994),
            Some(9.3),
        ),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let manager = ConnectionManager::new(MongoConnector::new(&args.mongo_db), args.retry_policy());
    let uri = args.mongo_uri.clone().unwrap_or_default();
    let client = manager.connect(&uri).await?;

    let result: anyhow::Result<()> = async {
        let movies = MongoMovieRepository::new(&client).await?;
        let removed = movies.delete_all().await?;
        info!("Removed {} existing movie(s)", removed);

        for movie in sample_movies() {
            let stored = movies.create(movie).await?;
            info!("Inserted '{}'", stored.title);
        }
        Ok(())
    }
    .await;

    manager.close().await;

    match &result {
        Ok(()) => info!("Seed complete"),
        Err(e) => error!("Seed failed: {}", e),
    }
    result
}
