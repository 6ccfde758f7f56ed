#![allow(unused)]

//! # contract: seams between the run orchestration and the outside world
//!
//! The driver never talks to a browser, S3, Google Drive or the Lambda API directly.
//! It goes through the traits below, which the binary crate implements for real
//! (WebDriver, AWS SDK) and the test suite replaces with `mockall` mocks.
//!
//! ## Traits
//! - [`FileFetcher`]: turn a file reference (share link, object key, local path) into a local file.
//! - [`ListingPortal`]: a logged-in browser session against the listing site.
//! - [`PortalLauncher`]: starts a [`ListingPortal`] on demand.
//! - [`IpLookup`]: the egress IP this process is using, for reporting.
//! - [`FunctionDeployer`]: redeploy the function image so the next cold start gets a new IP.
//! - [`ObjectLister`]: enumerate objects in a bucket.
//!
//! All methods are async and return [`AutomationResult`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use mockall::{automock, predicate::*};

use crate::error::AutomationResult;

/// A file ready to hand to the browser's file input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    /// Scratch copies downloaded from a remote source; removed after use.
    pub temporary: bool,
}

impl FetchedFile {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: true,
        }
    }

    /// Remove the file if it is a scratch copy. Local inputs are never touched.
    pub fn cleanup(&self) {
        if !self.temporary {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary file"),
            Err(e) => warn!(error = ?e, path = %self.path.display(), "Failed to remove temporary file"),
        }
    }
}

/// Summary of one object in a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: Option<i64>,
    pub last_modified: Option<String>,
}

/// Outcome of a function redeploy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Deployment {
    pub function_arn: String,
    pub code_sha256: Option<String>,
    pub last_update_status: Option<String>,
}

/// Fetches a file named by a reference into the local filesystem.
///
/// `temporary_name` is the file name used inside the temp folder for remote sources;
/// local implementations ignore it.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, reference: &str, temporary_name: &str) -> AutomationResult<FetchedFile>;
}

/// A browser session against the listing site.
///
/// Calls are made in order: `login`, one or more `upload`s, `logout`, and finally
/// `quit` once per process regardless of earlier failures.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ListingPortal: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> AutomationResult<()>;

    /// Upload a local CSV through the batch upload page and confirm every update and import.
    async fn upload(&self, csv_path: &Path) -> AutomationResult<()>;

    async fn logout(&self) -> AutomationResult<()>;

    async fn quit(&self) -> AutomationResult<()>;
}

/// Starts a browser session. The driver calls this only after the run's settings validate.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PortalLauncher: Send + Sync {
    async fn launch(&self) -> AutomationResult<Box<dyn ListingPortal>>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait IpLookup: Send + Sync {
    /// `None` when the lookup fails; callers only use this for reporting.
    async fn public_ip(&self) -> Option<String>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait FunctionDeployer: Send + Sync {
    async fn redeploy(&self, function_arn: &str, image_uri: &str) -> AutomationResult<Deployment>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectLister: Send + Sync {
    async fn list_objects(&self, bucket: &str) -> AutomationResult<Vec<ObjectSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn cleanup_removes_only_temporary_files() {
        let dir = tempdir().unwrap();
        let scratch = dir.path().join("s3tmpfile.csv");
        let kept = dir.path().join("listings.csv");
        fs::write(&scratch, "a,b\n").unwrap();
        fs::write(&kept, "a,b\n").unwrap();

        FetchedFile::temporary(&scratch).cleanup();
        FetchedFile::local(&kept).cleanup();

        assert!(!scratch.exists());
        assert!(kept.exists());
    }

    #[test]
    fn cleanup_of_missing_file_does_not_panic() {
        let dir = tempdir().unwrap();
        FetchedFile::temporary(dir.path().join("gone.csv")).cleanup();
    }
}
