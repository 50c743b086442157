use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rs_sign_pipeline::config::config::TrainingConfig;
use rs_sign_pipeline::dataset::dataset::Dataset;
use rs_sign_pipeline::training::trainer::train_classifier;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the sign gesture classifier from a landmark CSV")]
struct Args {
    /// Input CSV produced by build-dataset
    #[arg(long, default_value = "landmarks.csv")]
    dataset: PathBuf,

    /// Output path for the model weights
    #[arg(long, default_value = "sign_model.npz")]
    model_out: PathBuf,

    /// Output path for the label mapping
    #[arg(long, default_value = "label_mapping.json")]
    label_mapping_out: PathBuf,

    #[arg(long, default_value_t = 50)]
    epochs: usize,

    #[arg(long, default_value_t = 128)]
    batch_size: usize,

    #[arg(long, default_value_t = 5e-4)]
    learning_rate: f32,

    #[arg(long, default_value_t = 5)]
    patience: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let dataset = Dataset::read_csv(&args.dataset).with_context(|| {
        format!(
            "cannot read {}; run build-dataset over a labeled corpus first",
            args.dataset.display()
        )
    })?;
    info!(
        "loaded {} samples over {} labels from {}",
        dataset.len(),
        dataset.labels().len(),
        args.dataset.display()
    );

    let mut config = TrainingConfig::new();
    config.epochs = args.epochs;
    config.batch_size = args.batch_size;
    config.learning_rate = args.learning_rate;
    config.patience = args.patience;
    config.seed = args.seed;

    let outcome = train_classifier(&dataset, &config)?;

    // The pair is only useful together; persist both or fail loudly.
    outcome.network.save(&args.model_out)?;
    outcome.label_mapping.save(&args.label_mapping_out)?;
    info!(
        "saved model to {} and label mapping to {}",
        args.model_out.display(),
        args.label_mapping_out.display()
    );

    info!(
        "final validation accuracy: {:.2}%",
        outcome.validation_accuracy * 100.0
    );
    Ok(())
}
