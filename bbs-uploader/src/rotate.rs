//! IP rotation by redeploying the function's own container image.
//!
//! Lambda hands out a new egress address on a fresh cold start. Pushing the same image
//! again forces that without changing what runs.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_lambda::config::Region;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::types::LastUpdateStatus;
use aws_sdk_lambda::Client;
use bbs_uploader_core::config::Settings;
use bbs_uploader_core::contract::{Deployment, FunctionDeployer};
use bbs_uploader_core::error::{AutomationError, AutomationResult};
use bbs_uploader_core::wait::wait_until;
use tracing::{debug, info, warn};

const UPDATE_TIMEOUT: Duration = Duration::from_secs(300);
const UPDATE_POLL: Duration = Duration::from_secs(5);

pub struct LambdaDeployer {
    client: Client,
    update_timeout: Duration,
    poll: Duration,
}

impl LambdaDeployer {
    /// Deployer in the function's own region, with the default credentials chain.
    ///
    /// The region comes from `AWS_LAMBDA_ARN`, then `AWS_S3_REGION`, then the default
    /// provider chain.
    pub async fn for_settings(settings: &Settings) -> Self {
        let region = deploy_region(
            settings.aws_lambda_arn.as_deref(),
            settings.aws_s3_region.as_deref(),
        );
        debug!(region = ?region, "Loading Lambda client configuration");
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;
        Self::from_conf(aws_sdk_lambda::Config::new(&config))
    }

    pub fn from_conf(conf: aws_sdk_lambda::Config) -> Self {
        Self {
            client: Client::from_conf(conf),
            update_timeout: UPDATE_TIMEOUT,
            poll: UPDATE_POLL,
        }
    }

    pub fn with_polling(mut self, update_timeout: Duration, poll: Duration) -> Self {
        self.update_timeout = update_timeout;
        self.poll = poll;
        self
    }

    async fn update_status(&self, function_arn: &str) -> AutomationResult<UpdateState> {
        let config = self
            .client
            .get_function_configuration()
            .function_name(function_arn)
            .send()
            .await
            .map_err(|e| {
                AutomationError::Deploy(format!(
                    "could not read configuration of {function_arn}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(update_state(
            config.last_update_status(),
            config.last_update_status_reason(),
        ))
    }
}

/// Region segment of `arn:aws:lambda:<region>:<account>:function:<name>`.
pub fn region_from_arn(arn: &str) -> Option<&str> {
    let mut parts = arn.split(':');
    if parts.next()? != "arn" {
        return None;
    }
    let _partition = parts.next()?;
    let _service = parts.next()?;
    parts.next().filter(|region| !region.is_empty())
}

fn deploy_region(function_arn: Option<&str>, fallback: Option<&str>) -> Option<String> {
    function_arn
        .and_then(region_from_arn)
        .or(fallback)
        .map(str::to_string)
}

/// Where a function update stands, from `LastUpdateStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    InProgress,
    Done(Option<String>),
    Failed(String),
}

pub fn update_state(status: Option<&LastUpdateStatus>, reason: Option<&str>) -> UpdateState {
    match status {
        Some(LastUpdateStatus::InProgress) => UpdateState::InProgress,
        Some(LastUpdateStatus::Failed) => {
            UpdateState::Failed(reason.unwrap_or("no reason given").to_string())
        }
        Some(other) => UpdateState::Done(Some(other.as_str().to_string())),
        None => UpdateState::Done(None),
    }
}

#[async_trait]
impl FunctionDeployer for LambdaDeployer {
    async fn redeploy(&self, function_arn: &str, image_uri: &str) -> AutomationResult<Deployment> {
        info!(function_arn, image_uri, "Updating function code");
        let updated = self
            .client
            .update_function_code()
            .function_name(function_arn)
            .image_uri(image_uri)
            .publish(true)
            .send()
            .await
            .map_err(|e| {
                AutomationError::Deploy(format!(
                    "UpdateFunctionCode failed for {function_arn}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let this = self;
        let status = wait_until("function update", self.update_timeout, self.poll, move || async move {
            match this.update_status(function_arn).await? {
                UpdateState::InProgress => {
                    debug!(function_arn, "Function update still in progress");
                    Ok(None)
                }
                UpdateState::Done(status) => Ok(Some(status)),
                UpdateState::Failed(reason) => {
                    warn!(function_arn, reason = %reason, "Function update failed");
                    Err(AutomationError::Deploy(format!(
                        "update of {function_arn} failed: {reason}"
                    )))
                }
            }
        })
        .await?;

        Ok(Deployment {
            function_arn: updated.function_arn().unwrap_or(function_arn).to_string(),
            code_sha256: updated.code_sha256().map(str::to_string),
            last_update_status: status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_lambda::config::Credentials;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const FUNCTION_ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:bbs-uploader";
    const IMAGE_URI: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/bbs-uploader:latest";

    /// Read one request through its body and return the request line.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Answer one connection per body, in order, and hand back the request lines.
    async fn serve_sequence(bodies: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    fn deployer_for(endpoint: &str) -> LambdaDeployer {
        let conf = aws_sdk_lambda::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(Credentials::new("AKIDTEST", "secret", None, None, "test"))
            .build();
        LambdaDeployer::from_conf(conf)
            .with_polling(Duration::from_secs(5), Duration::from_millis(10))
    }

    const CODE_UPDATED: &str = r#"{"FunctionName":"bbs-uploader","FunctionArn":"arn:aws:lambda:us-east-1:123456789012:function:bbs-uploader:7","CodeSha256":"c0ffee","LastUpdateStatus":"InProgress"}"#;
    const STILL_UPDATING: &str = r#"{"FunctionName":"bbs-uploader","LastUpdateStatus":"InProgress"}"#;

    #[tokio::test]
    async fn redeploy_waits_for_successful_update() {
        let (endpoint, server) = serve_sequence(vec![
            CODE_UPDATED,
            STILL_UPDATING,
            r#"{"FunctionName":"bbs-uploader","LastUpdateStatus":"Successful"}"#,
        ])
        .await;

        let deployment = deployer_for(&endpoint)
            .redeploy(FUNCTION_ARN, IMAGE_URI)
            .await
            .expect("redeploy should succeed");

        assert_eq!(
            deployment,
            Deployment {
                function_arn: "arn:aws:lambda:us-east-1:123456789012:function:bbs-uploader:7".into(),
                code_sha256: Some("c0ffee".into()),
                last_update_status: Some("Successful".into()),
            }
        );
        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with("PUT ") && requests[0].contains("/code"), "{requests:?}");
        assert!(requests[1].starts_with("GET ") && requests[1].contains("/configuration"), "{requests:?}");
        assert!(requests[2].starts_with("GET ") && requests[2].contains("/configuration"), "{requests:?}");
    }

    #[tokio::test]
    async fn redeploy_reports_failed_update_with_reason() {
        let (endpoint, server) = serve_sequence(vec![
            CODE_UPDATED,
            STILL_UPDATING,
            r#"{"FunctionName":"bbs-uploader","LastUpdateStatus":"Failed","LastUpdateStatusReason":"image manifest not found"}"#,
        ])
        .await;

        let err = deployer_for(&endpoint)
            .redeploy(FUNCTION_ARN, IMAGE_URI)
            .await
            .unwrap_err();

        assert!(matches!(err, AutomationError::Deploy(_)), "got: {err:?}");
        assert!(err.to_string().contains("image manifest not found"), "got: {err}");
        assert_eq!(server.await.unwrap().len(), 3);
    }

    #[test]
    fn region_comes_from_function_arn() {
        assert_eq!(region_from_arn(FUNCTION_ARN), Some("us-east-1"));
        assert_eq!(
            region_from_arn("arn:aws-cn:lambda:cn-north-1:123456789012:function:f"),
            Some("cn-north-1")
        );
        assert_eq!(region_from_arn("bbs-uploader"), None);
        assert_eq!(region_from_arn("arn:aws:lambda::123:function:f"), None);
    }

    #[test]
    fn s3_region_is_the_fallback() {
        assert_eq!(
            deploy_region(Some("arn:aws:lambda:eu-west-1:1:function:f"), Some("us-east-2")).as_deref(),
            Some("eu-west-1")
        );
        assert_eq!(deploy_region(Some("bbs-uploader"), Some("us-east-2")).as_deref(), Some("us-east-2"));
        assert_eq!(deploy_region(None, None), None);
    }

    #[test]
    fn in_progress_keeps_waiting() {
        assert_eq!(
            update_state(Some(&LastUpdateStatus::InProgress), None),
            UpdateState::InProgress
        );
    }

    #[test]
    fn successful_update_reports_status() {
        assert_eq!(
            update_state(Some(&LastUpdateStatus::Successful), None),
            UpdateState::Done(Some("Successful".into()))
        );
        assert_eq!(update_state(None, None), UpdateState::Done(None));
    }

    #[test]
    fn failed_update_carries_reason() {
        assert_eq!(
            update_state(Some(&LastUpdateStatus::Failed), Some("image not found")),
            UpdateState::Failed("image not found".into())
        );
        assert_eq!(
            update_state(Some(&LastUpdateStatus::Failed), None),
            UpdateState::Failed("no reason given".into())
        );
    }
}
