use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use perceptual::{
    backend::{loss_device, LossBackend, BACKEND_NAME},
    eval::{run_eval, EvalConfig},
    loss::{LossKind, TOTAL_KEY},
};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(name = "perceptual")]
#[command(about = "Perceptual training losses for image-to-image models")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a loss on a target/reconstruction image pair
    Eval {
        /// Loss variant: Naive, ViT, VGG, ViTVGG or ViTVGGAlt
        #[arg(short, long)]
        loss: String,

        /// JSON loss configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Ground-truth image
        #[arg(short, long)]
        target: PathBuf,

        /// Reconstructed image
        #[arg(short, long)]
        reconstruction: PathBuf,

        /// Current training epoch, for the warm-up variants
        #[arg(short, long)]
        epoch: Option<usize>,

        /// Width of the content embedding
        #[arg(long, default_value_t = 256)]
        embedding_dim: usize,
    },

    /// Show backend information
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let device = loss_device();

    match cli.command {
        Commands::Eval {
            loss,
            config,
            target,
            reconstruction,
            epoch,
            embedding_dim,
        } => {
            let eval_config = EvalConfig {
                loss,
                config,
                target,
                reconstruction,
                epoch,
                embedding_dim,
            };
            let report = run_eval::<LossBackend>(&eval_config, &device)?;

            for (name, value) in report.terms.iter().filter(|(name, _)| *name != TOTAL_KEY) {
                println!("{name:>20}: {value:.6}");
            }
            if let Some(total) = report.terms.get(TOTAL_KEY) {
                println!("{TOTAL_KEY:>20}: {total:.6}");
            }
            println!("{:>20}: {:.6e}", "grad (mean |d/dx|)", report.reconstruction_grad);
            Ok(())
        }

        Commands::Info => {
            println!("Perceptual loss information:");
            println!("  Backend: {BACKEND_NAME} with autodiff");
            println!("  Device: {device:?}");
            let variants: Vec<_> = LossKind::ALL.iter().map(|kind| kind.as_str()).collect();
            println!("  Loss variants: {}", variants.join(", "));
            Ok(())
        }
    }
}
