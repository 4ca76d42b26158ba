//! Fetch command - download tiles through the scheduler over HTTP.

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::info;

use tilesched::provider::ReqwestClient;
use tilesched::{
    HttpTileProvider, SchedulerConfig, SchedulerRegistry, TileCoord, TileProviderId, TileRequest,
};

use crate::error::CliError;

/// Tile type used for ad-hoc HTTP fetches.
pub const FETCH_TILE_TYPE: &str = "http";

/// Arguments for the fetch command.
pub struct FetchArgs {
    pub urls: Vec<String>,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

/// Run the fetch command.
pub async fn run(args: FetchArgs, config: SchedulerConfig) -> Result<(), CliError> {
    if args.urls.is_empty() {
        return Err(CliError::Args("at least one --url is required".to_string()));
    }
    if args.concurrency == 0 {
        return Err(CliError::Args("--concurrency must be at least 1".to_string()));
    }

    let client = ReqwestClient::with_timeout(args.timeout_secs).map_err(CliError::Http)?;
    let provider = Arc::new(HttpTileProvider::new(client, FETCH_TILE_TYPE, args.concurrency));

    let registry = SchedulerRegistry::new(config, Handle::current());
    let layer = registry.get_tile_manager(Some(TileProviderId::new("fetch")), provider)?;

    let started = Instant::now();
    let mut waits = JoinSet::new();
    for (i, url) in args.urls.iter().enumerate() {
        let request = TileRequest::generated(TileCoord::new(i as u32, 0, 0)).with_url(url.as_str());
        let load = layer.load_tile(request)?;
        let url = url.clone();
        waits.spawn(async move { (url, load.wait().await) });
    }
    info!(urls = waits.len(), "Submitted HTTP fetches");

    let mut failures = 0;
    while let Some(joined) = waits.join_next().await {
        let (url, outcome) = joined.map_err(|e| CliError::Runtime(e.to_string()))?;
        match outcome {
            Some(Ok(tile)) => println!("  OK    {} ({} bytes)", url, tile.len()),
            Some(Err(e)) => {
                failures += 1;
                println!("  FAIL  {} ({})", url, e);
            }
            None => println!("  DROP  {}", url),
        }
    }

    println!();
    println!(
        "Fetched {} of {} tiles in {:.2}s",
        args.urls.len() - failures,
        args.urls.len(),
        started.elapsed().as_secs_f64()
    );

    drop(layer);
    registry.shutdown();
    Ok(())
}
