//! DemandRank - headless map pipeline driver
//!
//! Loads a dataset, starts the recompute scheduler and plays the role of the UI: map
//! movements, weight sliders and filter toggles arrive as stdin commands, and every
//! published frame is logged.

mod commands;
mod logging;
mod settings;

use commands::{Command, Controls, HELP};
use demand_rank_lib::utils::planar_distance;
use demand_rank_lib::{
    BUCKETS, ChunkStore, DemandError, FsSource, SIDEWALK_COLOR, Scheduler, Session, SharedView,
    ViewportState, describe_feature, to_csv, to_geojson,
};
use geo::Coord;
use settings::Settings;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Demand(#[from] DemandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No data source given, use --data-dir or --file")]
    NoSource,
}

fn main() -> ExitCode {
    logging::setup_logging();
    let settings = Settings::from_cli();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let input = BufReader::new(tokio::io::stdin());
    match runtime.block_on(run(settings, input)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn load_store(settings: &Settings) -> Result<ChunkStore, CliError> {
    let load = settings.config().load;

    #[cfg(feature = "http")]
    if let Some(url) = &settings.url {
        tracing::info!("Loading partitions from {url}");
        let source = demand_rank_lib::HttpSource::new(url.clone());
        return Ok(ChunkStore::load_all(Arc::new(source), load).await?);
    }

    if let Some(file) = &settings.file {
        tracing::info!("Loading collection {}", file.display());
        let bytes = tokio::fs::read(file).await?;
        return Ok(ChunkStore::from_collection(&bytes)?);
    }

    let directory = settings.data_dir.as_ref().ok_or(CliError::NoSource)?;
    tracing::info!("Loading partitions from {}", directory.display());
    let source = FsSource::with_pattern(directory, settings.pattern.clone());
    Ok(ChunkStore::load_all(Arc::new(source), load).await?)
}

/// The starting view: a share token, then an explicit center, then the data's center
fn initial_view(settings: &Settings, store: &ChunkStore) -> Result<(ViewportState, Option<SharedView>), CliError> {
    let config = settings.config();
    if let Some(token) = &settings.share {
        let shared = SharedView::decode(token)?;
        return Ok((shared.viewport, Some(shared)));
    }
    if let Some((lon, lat)) = settings.center {
        let center = Coord { x: lon, y: lat };
        let viewport = ViewportState::from_center_zoom(center, settings.zoom, config.viewport_pixels);
        return Ok((viewport, None));
    }
    let viewport = Session::overview(store, &config, settings.zoom).ok_or(DemandError::NoValidRecords)?;
    Ok((viewport, None))
}

async fn run<R>(settings: Settings, input: R) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
{
    let store = load_store(&settings).await?;
    let (viewport, shared) = initial_view(&settings, &store)?;

    let mut session = Session::new(Arc::new(store), settings.config(), viewport)?;
    if let Some(shared) = shared {
        session.apply_shared_view(shared);
    }
    let info = session.info();
    tracing::info!(
        "Session ready: {} records in {} chunks, {} active",
        info.record_count,
        info.chunk_count,
        info.active_chunk_count
    );

    let mut controls = Controls::from_session(&session);
    let scheduler = Scheduler::spawn(session);
    let frame_logger = tokio::spawn(log_frames(scheduler.frames()));

    if !settings.batch {
        read_commands(&scheduler, &mut controls, input).await?;
    }

    if let Some(path) = &settings.export_csv {
        export_csv(&scheduler, path).await?;
    }
    if let Some(path) = &settings.export_geojson {
        export_geojson(&scheduler, path).await?;
    }

    scheduler.shutdown().await;
    // Ends once the last frame is logged and the publisher is gone
    if let Err(e) = frame_logger.await {
        tracing::warn!("Frame logger did not finish cleanly: {e}");
    }
    Ok(())
}

async fn log_frames(mut frames: tokio::sync::watch::Receiver<Arc<demand_rank_lib::Frame>>) {
    loop {
        {
            let frame = frames.borrow_and_update();
            let sidewalks = frame.features.iter().filter(|f| f.sidewalk_layer).count();
            tracing::info!(
                "Frame {}: rendering {} of {} filtered records ({} sidewalk), {} active chunks, budget {}",
                frame.generation,
                frame.features.len(),
                frame.filtered_count,
                sidewalks,
                frame.active_chunk_count,
                frame.budget
            );
        }
        if frames.changed().await.is_err() {
            break;
        }
    }
}

/// Read commands line by line until EOF or `quit`
///
/// Queries and exports first flush the scheduler so they see every earlier command.
async fn read_commands<R>(
    scheduler: &Scheduler,
    controls: &mut Controls,
    input: R,
) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match commands::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("error: {e}");
                continue;
            }
        };

        if let Some(event) = controls.apply(&command) {
            if let Command::Weight { .. } | Command::ResetWeights = command {
                println!("total weight: {:.0}%", controls.weights.total() * 100.0);
            }
            scheduler.send(event);
            continue;
        }

        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Share => match controls.shared_view().encode() {
                Ok(token) => println!("{token}"),
                Err(e) => println!("error: {e}"),
            },
            Command::Restore(token) => match SharedView::decode(&token) {
                Ok(view) => {
                    for event in controls.restore(view) {
                        scheduler.send(event);
                    }
                }
                Err(e) => println!("error: {e}"),
            },
            Command::ExportCsv(path) => report(export_csv(scheduler, &path).await),
            Command::ExportGeojson(path) => report(export_geojson(scheduler, &path).await),
            Command::Describe { lon, lat } => {
                let target = Coord { x: lon, y: lat };
                scheduler.flush().await;
                let summary = scheduler
                    .with_session(|session| {
                        session
                            .filtered()
                            .iter()
                            .min_by(|a, b| {
                                planar_distance(a.record.position, target)
                                    .total_cmp(&planar_distance(b.record.position, target))
                            })
                            .map(describe_feature)
                    })
                    .await;
                println!("{}", summary.as_deref().unwrap_or("no filtered records"));
            }
            Command::Info => {
                scheduler.flush().await;
                let info = scheduler.with_session(Session::info).await;
                match serde_json::to_string_pretty(&info) {
                    Ok(json) => println!("{json}"),
                    Err(e) => println!("error: {e}"),
                }
            }
            Command::Legend => {
                for bucket in &BUCKETS {
                    let range = if bucket.min.is_finite() {
                        format!(">= {}", bucket.min)
                    } else {
                        "below".to_string()
                    };
                    println!("{} {:<12} {range}", bucket.color, bucket.label);
                }
                println!("{} Existing sidewalk", SIDEWALK_COLOR);
            }
            _ => {}
        }
    }
    Ok(())
}

fn report(result: Result<(), CliError>) {
    if let Err(e) = result {
        println!("error: {e}");
    }
}

async fn export_csv(scheduler: &Scheduler, path: &Path) -> Result<(), CliError> {
    scheduler.flush().await;
    let csv = scheduler.with_session(|session| to_csv(&session.filtered())).await?;
    tokio::fs::write(path, csv).await?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

async fn export_geojson(scheduler: &Scheduler, path: &Path) -> Result<(), CliError> {
    scheduler.flush().await;
    let document = scheduler
        .with_session(|session| to_geojson(&session.filtered()))
        .await?;
    let json = serde_json::to_vec(&document).map_err(DemandError::from)?;
    tokio::fs::write(path, json).await?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}
