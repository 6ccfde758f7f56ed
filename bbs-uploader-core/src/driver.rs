//! Run dispatch: turn resolved [`Settings`] into sessions and a [`RunReport`].
//!
//! The report is the Lambda response body and the CLI's final output. It is always
//! produced, success or failure, and carries the egress IP the run used.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{FileSourceKind, Mode, Settings};
use crate::contract::{Deployment, FileFetcher, FunctionDeployer, IpLookup, ListingPortal, PortalLauncher};
use crate::credentials::find_credentials;
use crate::error::{AutomationError, AutomationResult};
use crate::session::{automate_multiple_user_sessions, automate_single_user_session};

/// Temporary file name for the credentials CSV pulled from S3.
pub const CREDENTIALS_TEMPORARY_NAME: &str = "s3tmpcredsfile.csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: ReportBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
}

impl RunReport {
    fn with_body(status_code: u16, body: ReportBody) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status_code,
            headers,
            body,
        }
    }

    pub fn success(message: impl Into<String>, ip: Option<String>) -> Self {
        Self::with_body(
            200,
            ReportBody {
                success: Some(message.into()),
                ip,
                ..ReportBody::default()
            },
        )
    }

    pub fn failure(err: &AutomationError, ip: Option<String>) -> Self {
        Self::with_body(
            500,
            ReportBody {
                error: Some(err.to_string()),
                ip,
                ..ReportBody::default()
            },
        )
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "statusCode": 500, "body": { "error": e.to_string() } })
        })
    }
}

/// Drives one invocation: validates settings, starts the browser, runs the sessions.
pub struct Driver<'a> {
    settings: Settings,
    launcher: &'a dyn PortalLauncher,
    files: &'a dyn FileFetcher,
    ip: Option<String>,
}

impl<'a> Driver<'a> {
    /// Build a driver and record the egress IP for this invocation.
    pub async fn new(
        settings: Settings,
        launcher: &'a dyn PortalLauncher,
        files: &'a dyn FileFetcher,
        net: &dyn IpLookup,
    ) -> Driver<'a> {
        let ip = net.public_ip().await;
        info!(ip = ?ip, mode = %settings.mode, "Initializing Driver");
        Driver {
            settings,
            launcher,
            files,
            ip,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run according to `MODE`.
    pub async fn run(&self) -> RunReport {
        info!(mode = %self.settings.mode, file_source = %self.settings.file_source, "Running automation");
        let outcome = match self.settings.mode {
            Mode::SingleUser => self.run_single_user().await,
            Mode::MultiUser => self.run_multi_user().await,
        };
        self.report(outcome)
    }

    /// A listings file landed in S3: find its owner's credentials and upload it as them.
    pub async fn handle_s3_trigger(&self, bucket: &str, file_key: &str) -> RunReport {
        let span = info_span!("s3_trigger", bucket, file_key);
        let outcome = self.run_s3_trigger(file_key).instrument(span).await;
        self.report(outcome)
    }

    /// Redeploy the function's current image so the next cold start gets a new egress IP.
    pub async fn rotate_ip(&self, deployer: &dyn FunctionDeployer) -> RunReport {
        let outcome = async {
            let (arn, image_uri) = self.settings.require_lambda()?;
            info!(function_arn = %arn, image_uri = %image_uri, previous_ip = ?self.ip, "Rotating IP address");
            let deployment = deployer.redeploy(&arn, &image_uri).await?;
            info!(
                function_arn = %deployment.function_arn,
                status = ?deployment.last_update_status,
                "Function redeployed"
            );
            Ok(deployment)
        }
        .await;

        match outcome {
            Ok(deployment) => {
                let message = format!(
                    "redeployed {} to rotate IP address (previous ip {})",
                    deployment.function_arn,
                    self.ip.as_deref().unwrap_or("unknown")
                );
                let mut report = RunReport::success(message, self.ip.clone());
                report.body.deployment = Some(deployment);
                report
            }
            Err(e) => {
                error!(error = %e, "IP rotation failed");
                RunReport::failure(&e, self.ip.clone())
            }
        }
    }

    fn report(&self, outcome: AutomationResult<String>) -> RunReport {
        match outcome {
            Ok(message) => {
                info!(message = %message, "Run complete");
                RunReport::success(message, self.ip.clone())
            }
            Err(e) => {
                error!(error = %e, timeout = e.is_timeout(), "Run failed");
                RunReport::failure(&e, self.ip.clone())
            }
        }
    }

    fn check_file_source(&self, file_source: FileSourceKind) -> AutomationResult<()> {
        if file_source == FileSourceKind::S3 {
            self.settings.require_s3()?;
        }
        Ok(())
    }

    async fn run_single_user(&self) -> AutomationResult<String> {
        let (username, password, csv) = self.settings.require_single_user()?;
        self.check_file_source(self.settings.file_source)?;

        info!("Creating automator with MODE=single_user");
        let portal = self.launcher.launch().await?;
        let outcome = automate_single_user_session(
            portal.as_ref(),
            self.files,
            self.settings.file_source,
            &username,
            &password,
            &csv,
        )
        .await;
        finish(portal.as_ref(), outcome).await?;

        Ok(format!(
            "batch upload of {csv} complete for single_user {username}"
        ))
    }

    async fn run_multi_user(&self) -> AutomationResult<String> {
        let roster = self.settings.require_multi_user()?;
        self.check_file_source(self.settings.file_source)?;

        info!("Creating automator with MODE=multi_user");
        let portal = self.launcher.launch().await?;
        let outcome = automate_multiple_user_sessions(
            portal.as_ref(),
            self.files,
            self.settings.file_source,
            &roster,
        )
        .await;
        let sessions = finish(portal.as_ref(), outcome).await?;
        info!(sessions, "All user sessions complete");

        Ok("batch uploads complete for multiple users".to_string())
    }

    async fn run_s3_trigger(&self, file_key: &str) -> AutomationResult<String> {
        info!("Handling S3 trigger for single_user mode");
        self.settings.require_s3()?;
        let credentials_key = self.settings.require_credentials_file()?;

        let credentials_file = self
            .files
            .fetch(&credentials_key, CREDENTIALS_TEMPORARY_NAME)
            .await?;
        let credentials = find_credentials(&credentials_file.path, file_key);
        credentials_file.cleanup();
        let credentials = credentials?;

        info!(username = %credentials.username, "Found credentials; automating user session");
        let portal = self.launcher.launch().await?;
        let outcome = automate_single_user_session(
            portal.as_ref(),
            self.files,
            FileSourceKind::S3,
            &credentials.username,
            &credentials.password,
            file_key,
        )
        .await;
        finish(portal.as_ref(), outcome).await?;

        Ok(format!(
            "batch upload of {file_key} complete for single_user {}",
            credentials.username
        ))
    }
}

/// Quit the browser whatever happened, then hand back the session outcome.
async fn finish<T>(portal: &dyn ListingPortal, outcome: AutomationResult<T>) -> AutomationResult<T> {
    info!("Shutting down the session");
    if let Err(e) = portal.quit().await {
        warn!(error = %e, "Failed to quit browser session");
    }
    outcome
}
