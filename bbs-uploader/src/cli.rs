//! # bbs-uploader CLI
//!
//! Command parsing and dispatch. Settings resolution, sessions and reports live in
//! `bbs-uploader-core`; this module only picks the entry point and prints the report.
//!
//! ## Commands
//! - `run [--config <yaml>]`: one local run from the environment, optionally layered on a
//!   YAML file of the same keys.
//! - `lambda`: start the Lambda runtime loop.
//! - `rotate-ip`: redeploy the function to get a new egress IP.
//! - `public-ip`: print the egress IP this machine uses.
//! - `list-objects [--bucket <name>]`: list the configured bucket.
//!
//! For programmatic use and integration tests, call [`run`] with a constructed [`Cli`].
use crate::app;
use crate::lambda;
use crate::load_config::local_env;
use crate::logging::apply_verbosity;
use crate::s3::S3Client;
use anyhow::{anyhow, Result};
use bbs_uploader_core::config::Settings;
use bbs_uploader_core::contract::{IpLookup, ObjectLister};
use bbs_uploader_core::driver::RunReport;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

/// CLI for bbs-uploader: automate BizBuySell batch listing uploads.
#[derive(Parser)]
#[clap(
    name = "bbs-uploader",
    version,
    about = "Upload listing CSVs to BizBuySell through its batch upload pages"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one batch upload locally, configured from the environment
    Run {
        /// YAML file of settings, overridden by the environment
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Serve as an AWS Lambda function
    Lambda,
    /// Redeploy the Lambda function so it gets a new egress IP
    RotateIp {
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Print the public IP address of this machine
    PublicIp,
    /// List objects in the configured S3 bucket
    ListObjects {
        #[clap(long)]
        config: Option<PathBuf>,
        /// Bucket to list instead of AWS_S3_BUCKET
        #[clap(long)]
        bucket: Option<String>,
    },
}

/// Resolve settings for a local command and set the log level they ask for.
fn settings_from(config: Option<&PathBuf>) -> Result<Settings> {
    let env = local_env(config.map(PathBuf::as_path))?;
    let settings = Settings::resolve(&env, &json!({}))?;
    apply_verbosity(settings.verbose);
    tracing::debug!(settings = ?settings, "Log level follows resolved settings");
    Ok(settings)
}

fn finish(command: &str, report: RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    if report.is_success() {
        tracing::info!(command, status = report.status_code, "Command complete");
        Ok(())
    } else {
        let message = report.body.error.unwrap_or_else(|| "unknown error".to_string());
        tracing::error!(command, status = report.status_code, error = %message, "Command failed");
        Err(anyhow!(message))
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config } => {
            let settings = settings_from(config.as_ref())?;
            tracing::info!(command = "run", mode = %settings.mode, "Starting batch upload");
            let net = app::ip_lookup();
            finish("run", app::run(settings, &net).await)
        }
        Commands::Lambda => {
            tracing::info!(command = "lambda", "Starting Lambda runtime loop");
            lambda::serve().await.map_err(|e| anyhow!(e))
        }
        Commands::RotateIp { config } => {
            let settings = settings_from(config.as_ref())?;
            tracing::info!(command = "rotate-ip", "Rotating IP address");
            let net = app::ip_lookup();
            finish("rotate-ip", app::rotate_ip(settings, &net).await)
        }
        Commands::PublicIp => {
            let ip = app::ip_lookup()
                .public_ip()
                .await
                .ok_or_else(|| anyhow!("could not determine public IP address"))?;
            println!("{ip}");
            Ok(())
        }
        Commands::ListObjects { config, bucket } => {
            let settings = settings_from(config.as_ref())?;
            let (configured_bucket, region) = match (bucket, settings.aws_s3_region.clone()) {
                (Some(bucket), Some(region)) => (bucket, region),
                (None, _) => settings.require_s3()?,
                (Some(_), None) => return Err(anyhow!("must provide AWS_S3_REGION to list objects")),
            };
            let s3 = S3Client::new(&region, &configured_bucket, &settings.temp_folder).await;
            let objects = s3.list_objects(&configured_bucket).await?;
            tracing::info!(command = "list-objects", bucket = %configured_bucket, count = objects.len(), "Listed objects");
            println!("{}", serde_json::to_string_pretty(&objects)?);
            Ok(())
        }
    }
}
