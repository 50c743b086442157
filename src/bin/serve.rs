use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rs_sign_pipeline::config::config::{DecisionConfig, HandDetectionConfig, ServerConfig};
use rs_sign_pipeline::detector_client::client::LandmarkDetectionClient;
use rs_sign_pipeline::modules::hand_detector::HandDetector;
use rs_sign_pipeline::modules::sign_classifier::{Scorer, SignClassifier};
use rs_sign_pipeline::pipeline::pipeline::SignPipeline;
use rs_sign_pipeline::server;

#[derive(Parser, Debug)]
#[command(name = "serve", about = "Sign gesture streaming inference server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:50052")]
    listen: String,

    /// Endpoint of the external hand-landmark detection service
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    detector: String,

    /// Path to the trained model weights
    #[arg(long, default_value = "sign_model.npz")]
    model: String,

    /// Path to the label mapping persisted with the model
    #[arg(long, default_value = "label_mapping.json")]
    label_mapping: String,

    /// Minimum confidence required to accept a prediction
    #[arg(long, default_value_t = 0.8)]
    confidence_threshold: f32,

    /// Minimum detection confidence passed to the detector
    #[arg(long, default_value_t = 0.7)]
    min_detection_confidence: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        listen_addr: args.listen,
        detector_addr: args.detector,
        model_path: args.model,
        label_mapping_path: args.label_mapping,
    };

    info!(
        "loading model artifacts from {} and {}",
        config.model_path, config.label_mapping_path
    );
    // A missing artifact pair is not fatal: the server still starts and
    // answers every frame with "Model Not Loaded" so the deployment stays
    // introspectable.
    let classifier: Option<Box<dyn Scorer>> =
        match SignClassifier::load(&config.model_path, &config.label_mapping_path) {
            Ok(classifier) => {
                info!(
                    "server is ready, model is loaded with {} classes",
                    classifier.num_classes()
                );
                Some(Box::new(classifier))
            }
            Err(e) => {
                error!("could not load model artifacts: {:#}", e);
                None
            }
        };

    let landmark_client = LandmarkDetectionClient::connect(config.detector_addr.clone()).await?;
    info!("connected to landmark detector at {}", config.detector_addr);

    let mut detection_config = HandDetectionConfig::new_live();
    detection_config.min_detection_confidence = args.min_detection_confidence;
    let detector = HandDetector::new(landmark_client, detection_config);

    let decision_config = DecisionConfig {
        confidence_threshold: args.confidence_threshold,
    };
    let pipeline = Arc::new(SignPipeline::new(
        Box::new(detector),
        classifier,
        decision_config,
    ));

    let addr = config.listen_addr.parse()?;
    server::server::serve(addr, pipeline).await
}
