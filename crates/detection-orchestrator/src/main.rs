use std::path::Path;
use std::process::ExitCode;

use detection_core::{Geometry, Zone};
use detection_orchestrator::{MiningPipeline, PipelineConfig};
use raster_client::HttpRasterBackend;

fn load_zone(name: &str, path: &Path) -> Result<Zone, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let doc: serde_json::Value = serde_json::from_str(&raw)?;
    let geometry = Geometry::from_geojson(&doc)?;
    Ok(if name == "mine" {
        Zone::reference(name, geometry)
    } else {
        Zone::exclusion(name, geometry)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("Usage: minewatch <mine.geojson> [no_go_zone.geojson ...]");
        return ExitCode::FAILURE;
    }

    let mine = match load_zone("mine", Path::new(&args[0])) {
        Ok(zone) => zone,
        Err(e) => {
            tracing::error!("Failed to load mine boundary {}: {}", args[0], e);
            return ExitCode::FAILURE;
        }
    };

    let mut no_go_zones = Vec::new();
    for (i, path) in args[1..].iter().enumerate() {
        match load_zone(&format!("no_go_zone_{}", i), Path::new(path)) {
            Ok(zone) => no_go_zones.push(zone),
            Err(e) => {
                tracing::error!("Failed to load exclusion zone {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        }
    }

    let config = PipelineConfig {
        result_path: Some("output.json".into()),
        ..PipelineConfig::default()
    };
    let pipeline = MiningPipeline::new(HttpRasterBackend::from_env(), config);

    match pipeline.run(&mine, &no_go_zones).await {
        Ok(document) => {
            tracing::info!(
                "Detection complete: {} valid months, current mine area {:.3} km2",
                document.metadata.valid_months.len(),
                document.mine.current_area_km2
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Detection run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
