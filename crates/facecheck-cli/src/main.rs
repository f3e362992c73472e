use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facecheck_core::{DistanceMetric, FaceService, FaceServiceOptions, OptionsUpdate};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facecheck", about = "Decide whether two photos show the same person")]
struct Cli {
    /// TOML file with [detection] / [verification] options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Overrides {
    /// Distance metric: cosine, euclidean, euclideanL2 or angular
    #[arg(long, global = true)]
    metric: Option<String>,
    /// Match threshold for the selected metric
    #[arg(long, global = true)]
    threshold: Option<f64>,
    /// Minimum detector confidence for a face (0-1)
    #[arg(long, global = true)]
    confidence: Option<f32>,
    /// Expand the detected face box by this percentage
    #[arg(long, global = true)]
    padding: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify two images and print the result as JSON
    Verify { image1: PathBuf, image2: PathBuf },
    /// Print the face box that would be used for an image
    Detect { image: PathBuf },
    /// Verify every pair of images under all four metrics (CSV)
    Matrix {
        #[arg(required = true, num_args = 2..)]
        images: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let mut update = match &cli.config {
        Some(path) => config::load_options_file(path)?,
        None => OptionsUpdate::default(),
    };
    update = update.merge(cli.overrides.to_update()?);
    if let Some(threshold) = cli.overrides.threshold {
        let metric = FaceServiceOptions::default()
            .merged(&update)?
            .verification
            .distance_metric;
        update = update.with_threshold(metric, threshold);
    }
    let options = FaceServiceOptions::default().merged(&update)?;

    let service = FaceService::new(options)?
        .with_embedder_config(config.embedder_config())
        .with_session_config(config.session);
    let paths = config.model_paths();
    service
        .initialize(&paths)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    let outcome = run(&service, cli.command).await;
    service.destroy();
    outcome
}

async fn run(service: &FaceService, command: Commands) -> Result<()> {
    match command {
        Commands::Verify { image1, image2 } => {
            let result = service.verify(&read(&image1)?, &read(&image2)?).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Detect { image } => {
            let face = service.detect_face(&read(&image)?).await?;
            println!("{}", serde_json::json!({ "image": image, "face": face }));
        }
        Commands::Matrix { images } => {
            let loaded = images
                .iter()
                .map(|path| Ok((display_name(path), read(path)?)))
                .collect::<Result<Vec<_>>>()?;

            println!("metric,image1,image2,distance,match");
            for metric in DistanceMetric::ALL {
                service.update_options(OptionsUpdate::default().with_metric(metric))?;

                for (i, (name1, bytes1)) in loaded.iter().enumerate() {
                    for (name2, bytes2) in &loaded[i + 1..] {
                        match service.verify(bytes1, bytes2).await {
                            Ok(r) => println!("{metric},{name1},{name2},{},{}", r.distance, r.matched),
                            Err(e) => println!("{metric},{name1},{name2},ERROR,{e}"),
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

impl Overrides {
    /// Flag values as a partial update. `threshold` is applied by the caller
    /// once the effective metric is known.
    fn to_update(&self) -> Result<OptionsUpdate> {
        let mut update = OptionsUpdate::default();
        if let Some(name) = &self.metric {
            update = update.with_metric_name(name)?;
        }
        if let Some(v) = self.confidence {
            update = update.with_confidence_threshold(v);
        }
        if let Some(v) = self.padding {
            update = update.with_padding_percentage(v);
        }
        Ok(update)
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
