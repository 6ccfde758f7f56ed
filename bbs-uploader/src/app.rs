//! Wiring: concrete fetchers, launcher and deployer for a resolved [`Settings`].

use std::future::Future;

use async_trait::async_trait;
use bbs_uploader_core::config::{FileSourceKind, Mode, Settings};
use bbs_uploader_core::contract::{FileFetcher, FunctionDeployer, IpLookup};
use bbs_uploader_core::download::{GoogleDriveClient, LocalFiles};
use bbs_uploader_core::driver::{Driver, RunReport};
use bbs_uploader_core::error::AutomationResult;
use bbs_uploader_core::net::NetworkUtility;
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::portal::ChromeLauncher;
use crate::rotate::LambdaDeployer;
use crate::s3::S3Client;

/// What an invocation can ask for, once its settings are resolved.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Entrypoints: Send + Sync {
    async fn run(&self, settings: Settings) -> RunReport;
    async fn s3_upload(&self, settings: Settings, bucket: &str, key: &str) -> RunReport;
    async fn rotate_ip(&self, settings: Settings) -> RunReport;
}

/// Entry points backed by Chrome, the configured file source and the Lambda API.
pub struct LiveEntrypoints {
    net: NetworkUtility,
}

impl LiveEntrypoints {
    pub fn new() -> Self {
        Self { net: ip_lookup() }
    }
}

impl Default for LiveEntrypoints {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Entrypoints for LiveEntrypoints {
    async fn run(&self, settings: Settings) -> RunReport {
        run(settings, &self.net).await
    }

    async fn s3_upload(&self, settings: Settings, bucket: &str, key: &str) -> RunReport {
        s3_upload(settings, bucket, key, &self.net).await
    }

    async fn rotate_ip(&self, settings: Settings) -> RunReport {
        rotate_ip(settings, &self.net).await
    }
}

/// The file fetcher for the configured `FILE_SOURCE`.
pub async fn file_fetcher(settings: &Settings) -> AutomationResult<Box<dyn FileFetcher>> {
    let files: Box<dyn FileFetcher> = match settings.file_source {
        FileSourceKind::GoogleDrive => Box::new(GoogleDriveClient::new(&settings.temp_folder)?),
        FileSourceKind::Local => Box::new(LocalFiles),
        FileSourceKind::S3 => {
            let (bucket, region) = settings.require_s3()?;
            Box::new(S3Client::new(&region, &bucket, &settings.temp_folder).await)
        }
    };
    Ok(files)
}

/// Run once according to `MODE`, then rotate the IP when `ROTATE_IP=1`.
pub async fn run(settings: Settings, net: &dyn IpLookup) -> RunReport {
    let files = match file_fetcher(&settings).await {
        Ok(files) => files,
        Err(e) => return RunReport::failure(&e, net.public_ip().await),
    };
    let launcher = ChromeLauncher::new(settings.clone());
    let driver = Driver::new(settings, &launcher, files.as_ref(), net).await;
    let report = driver.run().await;
    rotate_after(&driver, report, || lambda_deployer(driver.settings())).await
}

/// Handle one uploaded object: the key is the listings CSV, its owner is looked up in
/// `CREDENTIALS_FILE` in the same bucket.
pub async fn s3_upload(mut settings: Settings, bucket: &str, key: &str, net: &dyn IpLookup) -> RunReport {
    settings.mode = Mode::SingleUser;
    settings.file_source = FileSourceKind::S3;
    if settings.aws_s3_bucket.is_none() {
        settings.aws_s3_bucket = Some(bucket.to_string());
    }

    let files = match file_fetcher(&settings).await {
        Ok(files) => files,
        Err(e) => return RunReport::failure(&e, net.public_ip().await),
    };
    let launcher = ChromeLauncher::new(settings.clone());
    let driver = Driver::new(settings, &launcher, files.as_ref(), net).await;
    let report = driver.handle_s3_trigger(bucket, key).await;
    rotate_after(&driver, report, || lambda_deployer(driver.settings())).await
}

/// Redeploy the function so the next invocation gets a new egress IP.
pub async fn rotate_ip(settings: Settings, net: &dyn IpLookup) -> RunReport {
    let deployer = LambdaDeployer::for_settings(&settings).await;
    let launcher = ChromeLauncher::new(settings.clone());
    let driver = Driver::new(settings, &launcher, &LocalFiles, net).await;
    driver.rotate_ip(&deployer).await
}

async fn lambda_deployer(settings: &Settings) -> Box<dyn FunctionDeployer> {
    Box::new(LambdaDeployer::for_settings(settings).await)
}

/// Rotate after a run when `ROTATE_IP=1`, keeping the run's own outcome.
///
/// `deployer` is only built when a rotation is due.
async fn rotate_after<F, Fut>(driver: &Driver<'_>, report: RunReport, deployer: F) -> RunReport
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Box<dyn FunctionDeployer>>,
{
    if !driver.settings().rotate_ip {
        return report;
    }
    info!("ROTATE_IP=1, redeploying after run");
    let deployer = deployer().await;
    let rotation = driver.rotate_ip(deployer.as_ref()).await;
    if !rotation.is_success() {
        warn!(error = ?rotation.body.error, "IP rotation after run failed");
        return report;
    }
    let mut report = report;
    report.body.deployment = rotation.body.deployment;
    report
}

/// Egress IP lookup used by every entry point.
pub fn ip_lookup() -> NetworkUtility {
    NetworkUtility::new()
}
