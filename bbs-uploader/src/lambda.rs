//! Lambda entry point.
//!
//! One function handles three kinds of invocation:
//! - S3 `ObjectCreated` notifications: each record's key is uploaded for the user that
//!   owns it;
//! - rotation requests (`{"action": "rotate_ip"}` or a scheduled EventBridge event);
//! - anything else: a normal run, with string keys in the event overriding the environment.

use bbs_uploader_core::config::Settings;
use bbs_uploader_core::driver::RunReport;
use lambda_runtime::{service_fn, LambdaEvent};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::app::{Entrypoints, LiveEntrypoints};
use crate::logging::apply_verbosity;

/// A bucket/key pair from an S3 notification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    S3Upload(Vec<UploadedObject>),
    RotateIp,
    Run,
}

/// Decide what an event asks for.
pub fn classify(event: &Value) -> Invocation {
    let uploads: Vec<UploadedObject> = event
        .get("Records")
        .and_then(Value::as_array)
        .map(|records| records.iter().filter_map(uploaded_object).collect())
        .unwrap_or_default();
    if !uploads.is_empty() {
        return Invocation::S3Upload(uploads);
    }

    let action = event.get("action").and_then(Value::as_str);
    let source = event.get("source").and_then(Value::as_str);
    if action == Some("rotate_ip") || source == Some("aws.events") {
        return Invocation::RotateIp;
    }
    Invocation::Run
}

fn uploaded_object(record: &Value) -> Option<UploadedObject> {
    let s3 = record.get("s3")?;
    let bucket = s3.get("bucket")?.get("name")?.as_str()?;
    let key = s3.get("object")?.get("key")?.as_str()?;
    Some(UploadedObject {
        bucket: bucket.to_string(),
        key: decode_key(key),
    })
}

/// Object keys arrive form-encoded: `+` is a space, the rest is percent-encoded.
pub fn decode_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Handle one invocation and return the report as JSON.
pub async fn handle_event(event: Value) -> Value {
    handle_event_with(&LiveEntrypoints::new(), event).await
}

/// [`handle_event`] against any set of entry points.
pub async fn handle_event_with(entrypoints: &dyn Entrypoints, event: Value) -> Value {
    let invocation = classify(&event);
    info!(invocation = ?invocation, "Handling Lambda event");

    let settings = match Settings::from_env(&event) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Could not resolve settings");
            return RunReport::failure(&e, None).to_json();
        }
    };
    apply_verbosity(settings.verbose);
    debug!(settings = ?settings, "Log level follows resolved settings");

    let report = match invocation {
        Invocation::S3Upload(objects) => {
            let mut last = None;
            for object in objects {
                let report = entrypoints
                    .s3_upload(settings.clone(), &object.bucket, &object.key)
                    .await;
                if !report.is_success() {
                    warn!(file_key = %object.key, "Upload failed, skipping remaining records");
                    return report.to_json();
                }
                last = Some(report);
            }
            match last {
                Some(report) => report,
                None => RunReport::success("no uploaded objects in event", None),
            }
        }
        Invocation::RotateIp => entrypoints.rotate_ip(settings).await,
        Invocation::Run => entrypoints.run(settings).await,
    };
    report.to_json()
}

/// Run the Lambda runtime loop until the process is stopped.
pub async fn serve() -> Result<(), lambda_runtime::Error> {
    info!("Starting Lambda runtime");
    lambda_runtime::run(service_fn(|event: LambdaEvent<Value>| async move {
        Ok::<Value, lambda_runtime::Error>(handle_event(event.payload).await)
    }))
    .await
}
