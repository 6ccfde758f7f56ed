//! User sessions: log in, upload that user's listings CSV, log out.
//!
//! A multi-user batch is just the single-user session repeated for every roster row,
//! sequentially and in file order, on one shared browser. The first failing row stops
//! the batch.

use tracing::{error, info};

use crate::config::{mask, FileSourceKind};
use crate::contract::{FileFetcher, ListingPortal};
use crate::credentials::read_user_rows;
use crate::download::session_temporary_name;
use crate::error::AutomationResult;

/// Temporary file name for the downloaded roster.
pub const MULTI_USER_TEMPORARY_NAME: &str = "multi-user-tmp.csv";

/// Automate one batch upload for a single account.
///
/// `csv_reference` is interpreted by `files`: a Drive share link, an S3 key or a local
/// path. Downloaded copies are removed once the upload finishes, whether or not it
/// succeeded.
pub async fn automate_single_user_session(
    portal: &dyn ListingPortal,
    files: &dyn FileFetcher,
    file_source: FileSourceKind,
    username: &str,
    password: &str,
    csv_reference: &str,
) -> AutomationResult<()> {
    info!(
        username,
        password = %mask(password),
        csv_path = csv_reference,
        "Automating single user session"
    );

    portal.login(username, password).await?;

    let csv = files
        .fetch(csv_reference, session_temporary_name(file_source))
        .await?;
    let uploaded = portal.upload(&csv.path).await;
    csv.cleanup();
    if let Err(e) = uploaded {
        error!(username, error = %e, csv_path = csv_reference, "Upload failed");
        return Err(e);
    }

    portal.logout().await?;
    info!(username, csv_path = csv_reference, "Single user session complete");
    Ok(())
}

/// Run one session per row of the roster at `roster_reference`.
///
/// Returns the number of sessions completed.
pub async fn automate_multiple_user_sessions(
    portal: &dyn ListingPortal,
    files: &dyn FileFetcher,
    file_source: FileSourceKind,
    roster_reference: &str,
) -> AutomationResult<usize> {
    info!(roster = roster_reference, "Automating multiple user sessions from provided CSV");

    let roster = files.fetch(roster_reference, MULTI_USER_TEMPORARY_NAME).await?;
    let rows = read_user_rows(&roster.path);
    roster.cleanup();
    let rows = rows?;

    for (index, row) in rows.iter().enumerate() {
        info!(row = index + 1, total = rows.len(), username = %row.username, "Starting session");
        automate_single_user_session(
            portal,
            files,
            file_source,
            &row.username,
            &row.password,
            &row.csv_path,
        )
        .await?;
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{FetchedFile, MockFileFetcher, MockListingPortal};
    use crate::error::AutomationError;
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    #[tokio::test]
    async fn single_session_runs_login_upload_logout_in_order() {
        let dir = tempdir().unwrap();
        let downloaded = dir.path().join("tmp.csv");
        std::fs::write(&downloaded, "listing\n").unwrap();

        let mut seq = Sequence::new();
        let mut portal = MockListingPortal::new();
        let mut files = MockFileFetcher::new();

        portal
            .expect_login()
            .withf(|user, pass| user == "broker@x.com" && pass == "pw")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let fetched_path = downloaded.clone();
        files
            .expect_fetch()
            .with(eq("https://drive.google.com/file/d/ID/view"), eq("tmp.csv"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(FetchedFile::temporary(fetched_path.clone())));
        let expected_path = downloaded.clone();
        portal
            .expect_upload()
            .withf(move |path: &Path| path == expected_path)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        portal
            .expect_logout()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        automate_single_user_session(
            &portal,
            &files,
            FileSourceKind::GoogleDrive,
            "broker@x.com",
            "pw",
            "https://drive.google.com/file/d/ID/view",
        )
        .await
        .expect("session should succeed");

        assert!(!downloaded.exists(), "temporary download should be removed");
    }

    #[tokio::test]
    async fn failed_upload_still_removes_download_and_skips_logout() {
        let dir = tempdir().unwrap();
        let downloaded = dir.path().join("s3tmpfile.csv");
        std::fs::write(&downloaded, "listing\n").unwrap();

        let mut portal = MockListingPortal::new();
        let mut files = MockFileFetcher::new();
        portal.expect_login().returning(|_, _| Ok(()));
        let fetched_path = downloaded.clone();
        files
            .expect_fetch()
            .with(eq("acme.csv"), eq("s3tmpfile.csv"))
            .returning(move |_, _| Ok(FetchedFile::temporary(fetched_path.clone())));
        portal
            .expect_upload()
            .returning(|_| Err(AutomationError::timeout("#updateAll", 30)));
        portal.expect_logout().times(0);

        let err = automate_single_user_session(
            &portal,
            &files,
            FileSourceKind::S3,
            "a@x.com",
            "pw",
            "acme.csv",
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(!downloaded.exists());
    }

    #[tokio::test]
    async fn login_failure_skips_download() {
        let mut portal = MockListingPortal::new();
        let mut files = MockFileFetcher::new();
        portal
            .expect_login()
            .returning(|_, _| Err(AutomationError::timeout("dashboard", 15)));
        files.expect_fetch().times(0);

        let err = automate_single_user_session(
            &portal,
            &files,
            FileSourceKind::Local,
            "a@x.com",
            "pw",
            "/data/a.csv",
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn multi_user_runs_each_row_in_order() {
        let dir = tempdir().unwrap();
        let roster = dir.path().join("roster.csv");
        std::fs::write(
            &roster,
            "username,password,csv_path\na@x.com,pa,/data/a.csv\nb@x.com,pb,/data/b.csv\n",
        )
        .unwrap();

        let mut seq = Sequence::new();
        let mut portal = MockListingPortal::new();
        let mut files = MockFileFetcher::new();

        let roster_path = roster.clone();
        files
            .expect_fetch()
            .with(eq("roster.csv"), eq(MULTI_USER_TEMPORARY_NAME))
            .times(1)
            .returning(move |_, _| Ok(FetchedFile::local(roster_path.clone())));
        files
            .expect_fetch()
            .withf(|reference, _| reference.starts_with("/data/"))
            .times(2)
            .returning(|reference, _| Ok(FetchedFile::local(PathBuf::from(reference))));

        for user in ["a@x.com", "b@x.com"] {
            portal
                .expect_login()
                .withf(move |u, _| u == user)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
            portal
                .expect_upload()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            portal
                .expect_logout()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Ok(()));
        }

        let done = automate_multiple_user_sessions(
            &portal,
            &files,
            FileSourceKind::Local,
            "roster.csv",
        )
        .await
        .unwrap();
        assert_eq!(done, 2);
        assert!(roster.exists(), "local roster must not be deleted");
    }

    #[tokio::test]
    async fn multi_user_stops_at_first_failing_row() {
        let dir = tempdir().unwrap();
        let roster = dir.path().join("multi-user-tmp.csv");
        std::fs::write(
            &roster,
            "username,password,csv_path\na@x.com,pa,a.csv\nb@x.com,pb,b.csv\n",
        )
        .unwrap();

        let mut portal = MockListingPortal::new();
        let mut files = MockFileFetcher::new();
        let roster_path = roster.clone();
        files
            .expect_fetch()
            .with(eq("roster-key.csv"), eq(MULTI_USER_TEMPORARY_NAME))
            .returning(move |_, _| Ok(FetchedFile::temporary(roster_path.clone())));
        files
            .expect_fetch()
            .with(eq("a.csv"), eq("s3tmpfile.csv"))
            .times(1)
            .returning(|_, _| Err(AutomationError::Fetch("NoSuchKey".into())));
        portal.expect_login().times(1).returning(|_, _| Ok(()));
        portal.expect_upload().times(0);

        let err = automate_multiple_user_sessions(
            &portal,
            &files,
            FileSourceKind::S3,
            "roster-key.csv",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AutomationError::Fetch(_)));
        assert!(!roster.exists(), "downloaded roster should be removed");
    }
}
