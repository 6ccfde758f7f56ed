//! Run settings, resolved from a Lambda event layered over the process environment.
//!
//! String settings may come from either place; a non-empty value in the event wins.
//! Numeric and boolean settings only come from the environment, so an invocation
//! payload cannot stretch timeouts or flip the production switch.

use crate::error::{AutomationError, AutomationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Flat key/value view of the environment. Tests build one by hand.
pub type EnvMap = HashMap<String, String>;

const DEFAULT_WEBDRIVER_TIMEOUT_SECONDS: u64 = 15;
const DEFAULT_WEBDRIVER_UPLOAD_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MAX_TRIES: usize = 3;
const DEFAULT_WEBDRIVER_PORT: u16 = 9515;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    SingleUser,
    MultiUser,
}

impl FromStr for Mode {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "single_user" => Ok(Mode::SingleUser),
            "multi_user" => Ok(Mode::MultiUser),
            other => Err(AutomationError::Config(format!(
                "unsupported MODE '{other}' (expected single_user or multi_user)"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::SingleUser => f.write_str("single_user"),
            Mode::MultiUser => f.write_str("multi_user"),
        }
    }
}

/// Where input CSVs (and the multi-user roster) live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSourceKind {
    #[default]
    GoogleDrive,
    S3,
    Local,
}

impl FromStr for FileSourceKind {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "google_drive" => Ok(FileSourceKind::GoogleDrive),
            "s3" => Ok(FileSourceKind::S3),
            "local" => Ok(FileSourceKind::Local),
            other => Err(AutomationError::Config(format!(
                "unsupported FILE_SOURCE '{other}' (expected google_drive, s3 or local)"
            ))),
        }
    }
}

impl fmt::Display for FileSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSourceKind::GoogleDrive => f.write_str("google_drive"),
            FileSourceKind::S3 => f.write_str("s3"),
            FileSourceKind::Local => f.write_str("local"),
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub mode: Mode,
    pub single_user_username: Option<String>,
    pub single_user_password: Option<String>,
    pub single_user_csv: Option<String>,
    pub multi_user_csv: Option<String>,
    pub credentials_file: Option<String>,
    pub aws_s3_region: Option<String>,
    pub aws_s3_bucket: Option<String>,
    pub aws_lambda_arn: Option<String>,
    pub aws_lambda_ecr_image_uri: Option<String>,
    pub file_source: FileSourceKind,
    pub webdriver_timeout: Duration,
    pub webdriver_upload_timeout: Duration,
    pub max_tries: usize,
    pub webdriver_port: u16,
    pub verbose: bool,
    pub production: bool,
    pub rotate_ip: bool,
    pub temp_folder: PathBuf,
    pub chrome_path: PathBuf,
    pub chrome_driver_path: PathBuf,
}

impl Settings {
    /// Resolve from the real process environment.
    pub fn from_env(event: &Value) -> AutomationResult<Self> {
        let env: EnvMap = std::env::vars().collect();
        Self::resolve(&env, event)
    }

    pub fn resolve(env: &EnvMap, event: &Value) -> AutomationResult<Self> {
        let string = |key: &str| event_string(event, key).or_else(|| env_string(env, key));

        let mode = match string("MODE") {
            Some(raw) => raw.parse()?,
            None => Mode::default(),
        };
        let file_source = match string("FILE_SOURCE") {
            Some(raw) => raw.parse()?,
            None => FileSourceKind::default(),
        };

        let production = env_flag(env, "PRODUCTION");
        let verbose = env_flag(env, "VERBOSE")
            || event.get("verbose").and_then(Value::as_bool).unwrap_or(false);

        let (temp_folder, chrome_path, chrome_driver_path) = if production {
            (
                PathBuf::from("/tmp"),
                PathBuf::from("/opt/chrome/chrome"),
                PathBuf::from("/opt/chromedriver"),
            )
        } else {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            (
                cwd.clone(),
                cwd.join("chrome-dev").join("chrome"),
                cwd.join("chrome-dev").join("chromedriver"),
            )
        };

        let settings = Settings {
            mode,
            single_user_username: string("SINGLE_USER_USERNAME"),
            single_user_password: string("SINGLE_USER_PASSWORD"),
            single_user_csv: string("SINGLE_USER_CSV"),
            multi_user_csv: string("MULTI_USER_CSV"),
            credentials_file: string("CREDENTIALS_FILE"),
            aws_s3_region: string("AWS_S3_REGION"),
            aws_s3_bucket: string("AWS_S3_BUCKET"),
            aws_lambda_arn: string("AWS_LAMBDA_ARN"),
            aws_lambda_ecr_image_uri: string("AWS_LAMBDA_ECR_IMAGE_URI"),
            file_source,
            webdriver_timeout: Duration::from_secs(env_number(
                env,
                "WEBDRIVER_TIMEOUT_SECONDS",
                DEFAULT_WEBDRIVER_TIMEOUT_SECONDS,
            )?),
            webdriver_upload_timeout: Duration::from_secs(env_number(
                env,
                "WEBDRIVER_UPLOAD_TIMEOUT_SECONDS",
                DEFAULT_WEBDRIVER_UPLOAD_TIMEOUT_SECONDS,
            )?),
            max_tries: env_number(env, "MAX_TRIES", DEFAULT_MAX_TRIES)?.max(1),
            webdriver_port: env_number(env, "WEBDRIVER_PORT", DEFAULT_WEBDRIVER_PORT)?,
            verbose,
            production,
            rotate_ip: env_flag(env, "ROTATE_IP"),
            temp_folder: env_string(env, "TEMP_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(temp_folder),
            chrome_path: env_string(env, "CHROME_PATH")
                .map(PathBuf::from)
                .unwrap_or(chrome_path),
            chrome_driver_path: env_string(env, "CHROME_DRIVER_PATH")
                .map(PathBuf::from)
                .unwrap_or(chrome_driver_path),
        };
        settings.trace_loaded();
        Ok(settings)
    }

    pub fn trace_loaded(&self) {
        info!(
            mode = %self.mode,
            file_source = %self.file_source,
            production = self.production,
            verbose = self.verbose,
            max_tries = self.max_tries,
            "Loaded settings"
        );
        debug!(settings = ?self, "Settings loaded (full debug)");
    }

    /// Username, password and CSV reference for `single_user` mode.
    pub fn require_single_user(&self) -> AutomationResult<(String, String, String)> {
        match (
            &self.single_user_username,
            &self.single_user_password,
            &self.single_user_csv,
        ) {
            (Some(user), Some(pass), Some(csv)) => Ok((user.clone(), pass.clone(), csv.clone())),
            _ => Err(AutomationError::MissingSettings(
                "must provide SINGLE_USER_PASSWORD, SINGLE_USER_USERNAME, and SINGLE_USER_CSV \
                 for single_user mode"
                    .to_string(),
            )),
        }
    }

    pub fn require_multi_user(&self) -> AutomationResult<String> {
        self.multi_user_csv.clone().ok_or_else(|| {
            AutomationError::MissingSettings(
                "must provide MULTI_USER_CSV for multi_user mode - csv should include \
                 username,password,csv_path as columns"
                    .to_string(),
            )
        })
    }

    /// Bucket and region, both required whenever `FILE_SOURCE=s3`.
    pub fn require_s3(&self) -> AutomationResult<(String, String)> {
        match (&self.aws_s3_bucket, &self.aws_s3_region) {
            (Some(bucket), Some(region)) => Ok((bucket.clone(), region.clone())),
            _ => Err(AutomationError::MissingSettings(
                "must provide AWS_S3_REGION and AWS_S3_BUCKET if FILE_SOURCE=s3".to_string(),
            )),
        }
    }

    pub fn require_credentials_file(&self) -> AutomationResult<String> {
        self.credentials_file.clone().ok_or_else(|| {
            AutomationError::MissingSettings(
                "must provide CREDENTIALS_FILE to handle S3 upload events".to_string(),
            )
        })
    }

    /// Function ARN and image URI needed to redeploy the Lambda for IP rotation.
    pub fn require_lambda(&self) -> AutomationResult<(String, String)> {
        match (&self.aws_lambda_arn, &self.aws_lambda_ecr_image_uri) {
            (Some(arn), Some(image)) => Ok((arn.clone(), image.clone())),
            _ => Err(AutomationError::MissingSettings(
                "must provide AWS_LAMBDA_ARN and AWS_LAMBDA_ECR_IMAGE_URI to rotate the IP address"
                    .to_string(),
            )),
        }
    }

    pub fn webdriver_url(&self) -> String {
        format!("http://localhost:{}", self.webdriver_port)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("mode", &self.mode)
            .field("single_user_username", &self.single_user_username)
            .field(
                "single_user_password",
                &self.single_user_password.as_deref().map(mask),
            )
            .field("single_user_csv", &self.single_user_csv)
            .field("multi_user_csv", &self.multi_user_csv)
            .field("credentials_file", &self.credentials_file)
            .field("aws_s3_region", &self.aws_s3_region)
            .field("aws_s3_bucket", &self.aws_s3_bucket)
            .field("aws_lambda_arn", &self.aws_lambda_arn)
            .field("aws_lambda_ecr_image_uri", &self.aws_lambda_ecr_image_uri)
            .field("file_source", &self.file_source)
            .field("webdriver_timeout", &self.webdriver_timeout)
            .field("webdriver_upload_timeout", &self.webdriver_upload_timeout)
            .field("max_tries", &self.max_tries)
            .field("webdriver_port", &self.webdriver_port)
            .field("verbose", &self.verbose)
            .field("production", &self.production)
            .field("rotate_ip", &self.rotate_ip)
            .field("temp_folder", &self.temp_folder)
            .field("chrome_path", &self.chrome_path)
            .field("chrome_driver_path", &self.chrome_driver_path)
            .finish()
    }
}

/// Replace every character of a secret with `*`, keeping its length visible in logs.
pub fn mask(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}

fn event_string(event: &Value, key: &str) -> Option<String> {
    match event.get(key)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn env_string(env: &EnvMap, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.trim().is_empty()).cloned()
}

fn env_flag(env: &EnvMap, key: &str) -> bool {
    env.get(key).map(|v| v.trim() == "1").unwrap_or(false)
}

fn env_number<T: FromStr>(env: &EnvMap, key: &str, default: T) -> AutomationResult<T> {
    match env_string(env, key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AutomationError::Config(format!("{key} must be a non-negative integer, got '{raw}'"))
        }),
    }
}
