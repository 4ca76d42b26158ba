//! Simulate command - drive the scheduler with synthetic tile providers.
//!
//! Registers N providers of one tile type, submits M tiles to each and
//! reports per-provider statistics while the simulated fetches run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tilesched::provider::BoxFuture;
use tilesched::{
    FetchError, SchedulerConfig, SchedulerRegistry, Tile, TileCoord, TileOutcome, TileProvider,
    TileProviderHandle, TileProviderId, TileRequest,
};

use crate::error::CliError;

/// Tile type shared by all simulated providers.
pub const SIMULATED_TILE_TYPE: &str = "simulated";

/// Size of a simulated tile in bytes.
const SIMULATED_TILE_SIZE: usize = 256;

/// Arguments for the simulate command.
pub struct SimulateArgs {
    pub providers: usize,
    pub tiles: usize,
    pub concurrency: Option<usize>,
    pub provider_concurrency: usize,
    pub latency_ms: u64,
    pub hidden: usize,
    pub report_ms: u64,
}

/// Provider that "fetches" a tile by sleeping.
///
/// Every tenth tile of a zoom level fails, so error delivery shows up in the
/// summary.
struct SimulatedProvider {
    concurrency: usize,
    latency: Duration,
}

impl TileProvider for SimulatedProvider {
    fn tile_type(&self) -> &str {
        SIMULATED_TILE_TYPE
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn load_tile(&self, request: TileRequest, cancel: CancellationToken) -> BoxFuture<'_, TileOutcome> {
        let latency = self.latency;
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(FetchError::Provider("cancelled".to_string())),
                _ = tokio::time::sleep(latency) => {
                    if request.coord.x % 10 == 9 {
                        Err(FetchError::Http {
                            status: 503,
                            url: format!("sim://{}", request.coord),
                        })
                    } else {
                        Ok(Tile::new(request.coord, vec![0u8; SIMULATED_TILE_SIZE]))
                    }
                }
            }
        })
    }
}

#[derive(Debug, Default)]
struct Summary {
    completed: usize,
    failed: usize,
    released: usize,
}

/// Run the simulate command.
pub async fn run(args: SimulateArgs, config: SchedulerConfig) -> Result<(), CliError> {
    if args.providers == 0 {
        return Err(CliError::Args("--providers must be at least 1".to_string()));
    }
    if args.provider_concurrency == 0 {
        return Err(CliError::Args(
            "--provider-concurrency must be at least 1".to_string(),
        ));
    }

    let config = match args.concurrency {
        Some(concurrency) => config.with_type_concurrency(SIMULATED_TILE_TYPE, concurrency),
        None => config,
    };
    let registry = SchedulerRegistry::new(config, Handle::current());

    let mut layers = Vec::with_capacity(args.providers);
    for i in 0..args.providers {
        let provider = Arc::new(SimulatedProvider {
            concurrency: args.provider_concurrency,
            latency: Duration::from_millis(args.latency_ms),
        });
        let layer = registry.get_tile_manager(Some(TileProviderId::new(format!("layer-{}", i))), provider)?;
        if i < args.hidden {
            layer.set_visibility(false)?;
        }
        layers.push(layer);
    }

    let manager = registry
        .tile_manager(SIMULATED_TILE_TYPE)
        .ok_or_else(|| CliError::Runtime("simulated tile manager missing".to_string()))?;

    println!("Simulating tile scheduling:");
    println!("  Providers:   {} ({} hidden)", args.providers, args.hidden.min(args.providers));
    println!("  Tiles:       {} per provider", args.tiles);
    println!("  Concurrency: {} global, {} per provider", manager.concurrency(), args.provider_concurrency);
    println!("  Latency:     {}ms", args.latency_ms);
    println!();

    let started = Instant::now();
    let mut waits = JoinSet::new();
    for x in 0..args.tiles {
        // Interleave submissions so providers compete for capacity
        for layer in &layers {
            let request = TileRequest::generated(TileCoord::new(x as u32, 0, 12));
            let load = layer.load_tile(request)?;
            waits.spawn(load.wait());
        }
    }
    info!(tiles = waits.len(), "Submitted simulated tiles");

    let mut summary = Summary::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.report_ms.max(10)));
    ticker.tick().await;

    loop {
        tokio::select! {
            joined = waits.join_next() => match joined {
                Some(Ok(Some(Ok(_)))) => summary.completed += 1,
                Some(Ok(Some(Err(e)))) => {
                    debug!(error = %e, "Simulated fetch failed");
                    summary.failed += 1;
                }
                Some(Ok(None)) => summary.released += 1,
                Some(Err(e)) => return Err(CliError::Runtime(e.to_string())),
                None => break,
            },
            _ = ticker.tick() => print_stats(&layers),
        }
    }

    let elapsed = started.elapsed();
    print_stats(&layers);
    println!();
    println!("Summary:");
    println!("  Completed:   {}", summary.completed);
    println!("  Failed:      {}", summary.failed);
    println!("  Released:    {}", summary.released);
    println!("  Preemptions: {}", manager.preemptions());
    println!("  Elapsed:     {:.2}s", elapsed.as_secs_f64());

    drop(layers);
    registry.shutdown();
    Ok(())
}

fn print_stats(layers: &[TileProviderHandle]) {
    for layer in layers {
        match layer.stats() {
            Ok(stats) => println!("  {}: {}", layer.tile_provider_id(), stats),
            Err(e) => println!("  {}: {}", layer.tile_provider_id(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(providers: usize, tiles: usize) -> SimulateArgs {
        SimulateArgs {
            providers,
            tiles,
            concurrency: Some(2),
            provider_concurrency: 1,
            latency_ms: 1,
            hidden: 1,
            report_ms: 50,
        }
    }

    #[tokio::test]
    async fn test_simulation_runs_to_completion() {
        let result = run(args(3, 5), SchedulerConfig::default()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_zero_providers_rejected() {
        let result = run(args(0, 5), SchedulerConfig::default()).await;
        assert!(matches!(result, Err(CliError::Args(_))));
    }

    #[tokio::test]
    async fn test_simulated_provider_fails_every_tenth_tile() {
        let provider = SimulatedProvider {
            concurrency: 1,
            latency: Duration::ZERO,
        };
        let ok = provider
            .load_tile(TileRequest::new("a", TileCoord::new(3, 0, 1)), CancellationToken::new())
            .await;
        assert_eq!(ok.unwrap().len(), SIMULATED_TILE_SIZE);

        let failed = provider
            .load_tile(TileRequest::new("b", TileCoord::new(9, 0, 1)), CancellationToken::new())
            .await;
        assert!(matches!(failed, Err(FetchError::Http { status: 503, .. })));
    }
}
