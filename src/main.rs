//! ami-manager: copy AMIs across regions and accounts, and retire old ones
//!
//! Thin CLI over the replication and cleanup core. All heavy lifting lives in
//! the library modules; this binary parses arguments, initializes tracing,
//! and maps core errors to a non-zero exit.

use ami_manager::aws::{AccountId, AmiContext, ImageService, ImageServiceResolver};
use ami_manager::cleanup::RetentionCleaner;
use ami_manager::image::Ami;
use ami_manager::orchestrator::Replicator;
use ami_manager::reaper;
use ami_manager::wait::PollConfig;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ami-manager")]
#[command(about = "Copy AMIs across regions and accounts, and retire old generations")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy an AMI to other regions and share it with other accounts
    Copy {
        /// The source AMI ID, e.g. ami-0e38957fc6310ea8b
        #[arg(long = "ami-id")]
        ami_id: String,

        /// Regions to copy the AMI to (comma-separated or repeated)
        #[arg(long, value_delimiter = ',', required = true)]
        regions: Vec<String>,

        /// Account IDs authorized to launch the AMI (comma-separated or repeated)
        #[arg(long, value_delimiter = ',')]
        accounts: Vec<AccountId>,

        /// IAM role name assumed in each non-default account
        #[arg(long)]
        role: Option<String>,

        /// Seconds between availability checks while a copy settles
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,

        /// Maximum seconds to wait for any one copy to become available
        #[arg(long, default_value_t = 1800)]
        max_wait: u64,
    },

    /// Clean up earlier generations of the AMI, keeping the newest versions
    Cleanup {
        /// The source AMI ID whose tags define the generation signature
        #[arg(long = "ami-id")]
        ami_id: String,

        /// Regions to clean up (comma-separated or repeated)
        #[arg(long, value_delimiter = ',', required = true)]
        regions: Vec<String>,

        /// Tag keys matched against the source AMI's own values
        #[arg(long = "tags", value_delimiter = ',', required = true)]
        tag_keys: Vec<String>,

        /// Number of image generations to keep per region
        #[arg(long, default_value_t = 5)]
        versions_to_keep: usize,

        /// Region of the source AMI (defaults to the configured region)
        #[arg(long)]
        region: Option<String>,
    },

    /// Deregister a single AMI and delete its backing snapshots
    Remove {
        /// The AMI ID to remove
        #[arg(long = "ami-id")]
        ami_id: String,

        /// Region of the AMI (defaults to the configured region)
        #[arg(long)]
        region: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Copy {
            ami_id,
            regions,
            accounts,
            role,
            poll_interval,
            max_wait,
        } => {
            info!(image_id = %ami_id, regions = ?regions, "Started copying AMI");
            let start = Instant::now();

            let ctx = AmiContext::new(role).await?;
            let mut ami = Ami::with_target_regions(&ami_id, ctx.default_region(), &regions);

            let poll = PollConfig {
                interval: Duration::from_secs(poll_interval),
                max_wait: Duration::from_secs(max_wait),
            };
            let replicator = Replicator::new(&ctx, &accounts, poll);
            let reports = replicator.replicate(&mut ami).await?;

            for report in &reports {
                info!(
                    region = %report.region,
                    image_id = %report.image_id,
                    waited = ?report.waited,
                    "Region replicated"
                );
            }
            info!(elapsed = ?start.elapsed(), "Finished copying AMI");
        }

        Command::Cleanup {
            ami_id,
            regions,
            tag_keys,
            versions_to_keep,
            region,
        } => {
            let ctx = AmiContext::new(None).await?;
            let source_region = region.unwrap_or_else(|| ctx.default_region().to_string());
            let mut ami = Ami::new(&ami_id, &source_region);

            let cleaner = RetentionCleaner::new(&ctx);
            let reports = cleaner
                .cleanup(&mut ami, &regions, &tag_keys, versions_to_keep)
                .await?;

            let reaped: usize = reports.iter().map(|r| r.reaped.len()).sum();
            info!(
                image_id = %ami_id,
                regions = reports.len(),
                reaped,
                "Older AMI generations cleaned up"
            );
        }

        Command::Remove { ami_id, region } => {
            let ctx = AmiContext::new(None).await?;
            let source_region = region.unwrap_or_else(|| ctx.default_region().to_string());

            let service = ctx
                .image_service(ctx.default_account(), &source_region)
                .await?;
            let image = service.describe_image(&ami_id).await?;
            reaper::remove_image(service.as_ref(), &image).await?;

            info!(image_id = %ami_id, "AMI removed");
        }
    }

    Ok(())
}
