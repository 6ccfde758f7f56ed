//! File sources for input CSVs: Google Drive share links and the local filesystem.
//!
//! S3 lives in the binary crate next to the rest of the AWS SDK usage; it implements
//! the same [`FileFetcher`] trait so the driver can treat all three alike.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::config::FileSourceKind;
use crate::contract::{FetchedFile, FileFetcher};
use crate::error::{AutomationError, AutomationResult};

const DRIVE_SHARE_PREFIX: &str = "https://drive.google.com/file/d/";
const DRIVE_DOWNLOAD_BASE: &str = "https://docs.google.com";
const DEFAULT_TEMPORARY_NAME: &str = "tmp.csv";

/// Temporary name for the per-user listings CSV, by source.
pub fn session_temporary_name(kind: FileSourceKind) -> &'static str {
    match kind {
        FileSourceKind::S3 => "s3tmpfile.csv",
        FileSourceKind::GoogleDrive | FileSourceKind::Local => DEFAULT_TEMPORARY_NAME,
    }
}

/// Extract the file id from a link copied with Drive's "Copy link".
///
/// `https://drive.google.com/file/d/<id>/view?usp=sharing` → `<id>`
pub fn drive_file_id(shared_link: &str) -> AutomationResult<String> {
    let rest = shared_link
        .trim()
        .split_once(DRIVE_SHARE_PREFIX)
        .map(|(_, rest)| rest)
        .ok_or_else(|| {
            AutomationError::Fetch(format!("not a Google Drive share link: {shared_link}"))
        })?;
    let id = rest.split(['/', '?']).next().unwrap_or_default();
    if id.is_empty() {
        return Err(AutomationError::Fetch(format!(
            "Google Drive share link has no file id: {shared_link}"
        )));
    }
    Ok(id.to_string())
}

/// Direct export URL for a Drive file id.
pub fn drive_download_url(file_id: &str) -> String {
    download_url_at(DRIVE_DOWNLOAD_BASE, file_id)
}

fn download_url_at(base_url: &str, file_id: &str) -> String {
    format!(
        "{}/uc?id={}&confirm=1&export=download",
        base_url.trim_end_matches('/'),
        file_id
    )
}

/// Where a remote file named `temporary_name` is written; empty names fall back to `tmp.csv`.
pub fn temporary_destination(temp_folder: &Path, temporary_name: &str) -> PathBuf {
    let name = if temporary_name.is_empty() {
        DEFAULT_TEMPORARY_NAME
    } else {
        temporary_name
    };
    temp_folder.join(name)
}

/// Downloads shared Drive files without the Drive SDK, straight from the export URL.
pub struct GoogleDriveClient {
    client: reqwest::Client,
    base_url: String,
    temp_folder: PathBuf,
}

impl GoogleDriveClient {
    pub fn new(temp_folder: impl Into<PathBuf>) -> AutomationResult<Self> {
        Self::with_base_url(temp_folder, DRIVE_DOWNLOAD_BASE)
    }

    /// Point the client at another host; used by tests to serve files locally.
    pub fn with_base_url(
        temp_folder: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> AutomationResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            temp_folder: temp_folder.into(),
        })
    }

    pub async fn download(
        &self,
        shared_link: &str,
        temporary_name: &str,
    ) -> AutomationResult<PathBuf> {
        let destination = temporary_destination(&self.temp_folder, temporary_name);
        tracing::info!(
            link = shared_link,
            temporary_name,
            destination = %destination.display(),
            "Downloading file from Google Drive"
        );
        let file_id = drive_file_id(shared_link)?;
        let url = download_url_at(&self.base_url, &file_id);

        let mut response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, url = %url, "Google Drive returned an error");
            return Err(AutomationError::Fetch(format!(
                "Google Drive returned {status} for file {file_id}"
            )));
        }

        let mut file = tokio::fs::File::create(&destination).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            if chunk.is_empty() {
                continue;
            }
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::debug!(
            bytes = written,
            destination = %destination.display(),
            "Google Drive download complete"
        );
        Ok(destination)
    }
}

#[async_trait::async_trait]
impl FileFetcher for GoogleDriveClient {
    async fn fetch(&self, reference: &str, temporary_name: &str) -> AutomationResult<FetchedFile> {
        let path = self.download(reference, temporary_name).await?;
        Ok(FetchedFile::temporary(path))
    }
}

/// Files that already sit on disk. The reference is the path.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFiles;

#[async_trait::async_trait]
impl FileFetcher for LocalFiles {
    async fn fetch(&self, reference: &str, _temporary_name: &str) -> AutomationResult<FetchedFile> {
        let path = PathBuf::from(reference);
        tracing::debug!(path = %path.display(), "Checking local file exists before continuing");
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::error!(path = %path.display(), "Local file does not exist");
            return Err(AutomationError::FileNotFound(path));
        }
        Ok(FetchedFile::local(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn extracts_file_id_from_share_links() {
        let cases = [
            (
                "https://drive.google.com/file/d/1AbC-xyz_09/view?usp=sharing",
                "1AbC-xyz_09",
            ),
            ("https://drive.google.com/file/d/1AbC/view", "1AbC"),
            ("https://drive.google.com/file/d/1AbC", "1AbC"),
            ("  https://drive.google.com/file/d/1AbC/edit  ", "1AbC"),
        ];
        for (link, expected) in cases {
            assert_eq!(drive_file_id(link).unwrap(), expected, "link: {link}");
        }
    }

    #[test]
    fn rejects_links_that_are_not_drive_files() {
        assert!(drive_file_id("https://example.com/file.csv").is_err());
        assert!(drive_file_id("https://drive.google.com/file/d/").is_err());
    }

    #[test]
    fn builds_export_download_url() {
        assert_eq!(
            drive_download_url("abc"),
            "https://docs.google.com/uc?id=abc&confirm=1&export=download"
        );
        assert_eq!(
            download_url_at("http://127.0.0.1:8080/", "abc"),
            "http://127.0.0.1:8080/uc?id=abc&confirm=1&export=download"
        );
    }

    #[test]
    fn temporary_names_differ_per_source() {
        assert_eq!(session_temporary_name(FileSourceKind::S3), "s3tmpfile.csv");
        assert_eq!(session_temporary_name(FileSourceKind::GoogleDrive), "tmp.csv");
        assert_eq!(
            temporary_destination(Path::new("/tmp"), ""),
            PathBuf::from("/tmp/tmp.csv")
        );
    }

    /// Serve one canned HTTP response and hand back the request line.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request.lines().next().unwrap_or_default().to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn drive_download_writes_body_to_temp_folder() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", "username,password,csv_path\n").await;
        let dir = tempdir().unwrap();
        let client = GoogleDriveClient::with_base_url(dir.path(), base).unwrap();

        let fetched = client
            .fetch(
                "https://drive.google.com/file/d/FILE123/view",
                "multi-user-tmp.csv",
            )
            .await
            .expect("download should succeed");

        assert!(fetched.temporary);
        assert_eq!(fetched.path, dir.path().join("multi-user-tmp.csv"));
        let content = std::fs::read_to_string(&fetched.path).unwrap();
        assert_eq!(content, "username,password,csv_path\n");

        let request_line = server.await.unwrap();
        assert!(
            request_line.contains("/uc?id=FILE123&confirm=1&export=download"),
            "unexpected request: {request_line}"
        );
    }

    #[tokio::test]
    async fn drive_download_surfaces_http_errors() {
        let (base, _server) = serve_once("HTTP/1.1 404 Not Found", "").await;
        let dir = tempdir().unwrap();
        let client = GoogleDriveClient::with_base_url(dir.path(), base).unwrap();

        let err = client
            .download("https://drive.google.com/file/d/missing/view", "")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"), "got: {err}");
    }

    #[tokio::test]
    async fn local_files_must_exist() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("listings.csv");
        std::fs::write(&present, "id\n").unwrap();

        let fetched = LocalFiles
            .fetch(present.to_str().unwrap(), "ignored.csv")
            .await
            .unwrap();
        assert_eq!(fetched, FetchedFile::local(&present));

        let missing = dir.path().join("missing.csv");
        let err = LocalFiles
            .fetch(missing.to_str().unwrap(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::FileNotFound(_)));
    }
}
