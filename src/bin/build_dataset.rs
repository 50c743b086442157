use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rs_sign_pipeline::config::config::HandDetectionConfig;
use rs_sign_pipeline::dataset::dataset::DatasetBuilder;
use rs_sign_pipeline::detector_client::client::LandmarkDetectionClient;
use rs_sign_pipeline::modules::hand_detector::HandDetector;
use rs_sign_pipeline::utils::coordinate::FEATURE_DIMENSION;

#[derive(Parser, Debug)]
#[command(name = "build-dataset", about = "Extract landmark features from a labeled image corpus")]
struct Args {
    /// Corpus root: one subdirectory per label, image files within
    #[arg(long, default_value = "./dataset")]
    corpus: PathBuf,

    /// Output CSV path
    #[arg(long, default_value = "landmarks.csv")]
    output: PathBuf,

    /// Endpoint of the external hand-landmark detection service
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    detector: String,

    /// Minimum detection confidence passed to the detector
    #[arg(long, default_value_t = 0.6)]
    min_detection_confidence: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let landmark_client = LandmarkDetectionClient::connect(args.detector.clone()).await?;
    info!("connected to landmark detector at {}", args.detector);

    let mut detection_config = HandDetectionConfig::new_offline();
    detection_config.min_detection_confidence = args.min_detection_confidence;
    let detector = HandDetector::new(landmark_client, detection_config);

    let builder = DatasetBuilder::new(detector);
    let dataset = builder.build(&args.corpus).await?;
    dataset.write_csv(&args.output)?;

    info!(
        "wrote {} samples with {} features over {} labels to {}",
        dataset.len(),
        FEATURE_DIMENSION,
        dataset.labels().len(),
        args.output.display()
    );
    Ok(())
}
