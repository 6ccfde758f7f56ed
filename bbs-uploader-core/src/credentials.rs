//! The two credential CSVs the automation reads.
//!
//! - The multi-user roster: `username,password,csv_path`, one row per session.
//! - The credentials file used for S3 upload events: `File Name,Email,Password`,
//!   mapping an uploaded listings file to the account it belongs to.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::{error, info};

use crate::config::mask;
use crate::error::{AutomationError, AutomationResult};

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .finish()
    }
}

/// One row of the multi-user roster.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct UserRow {
    pub username: String,
    pub password: String,
    pub csv_path: String,
}

impl fmt::Debug for UserRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRow")
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("csv_path", &self.csv_path)
            .finish()
    }
}

#[derive(Deserialize)]
struct CredentialRow {
    #[serde(rename = "File Name")]
    file_name: String,
    #[serde(rename = "Email")]
    email: String,
    #[serde(rename = "Password")]
    password: String,
}

pub fn read_user_rows(path: &Path) -> AutomationResult<Vec<UserRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_path(path)?;
    let rows = reader
        .deserialize::<UserRow>()
        .collect::<Result<Vec<_>, csv::Error>>()?;
    info!(path = %path.display(), users = rows.len(), "Read multi-user CSV");
    Ok(rows)
}

/// Look up the account that owns `file_key`.
///
/// The key may carry a folder prefix (`uploads/acme.csv`), so a row matches when its
/// trimmed `File Name` occurs anywhere in the key. The first match wins.
pub fn find_credentials(path: &Path, file_key: &str) -> AutomationResult<Credentials> {
    info!(
        credentials_file = %path.display(),
        file_key,
        "Pulling credentials for uploaded file"
    );
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_path(path)?;
    for row in reader.deserialize::<CredentialRow>() {
        let row = row?;
        let file_name = row.file_name.trim();
        if !file_name.is_empty() && file_key.contains(file_name) {
            info!(
                file_key,
                username = %row.email,
                password = %mask(&row.password),
                "Found credentials for uploaded file"
            );
            return Ok(Credentials {
                username: row.email,
                password: row.password,
            });
        }
    }
    error!(file_key, credentials_file = %path.display(), "Could not find credentials for file");
    Err(AutomationError::CredentialsNotFound {
        file_key: file_key.to_string(),
    })
}
