//! Egress IP lookup, reported alongside every run result so IP rotation can be verified.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::contract::IpLookup;

const IP_ECHO_URL: &str = "https://api64.ipify.org?format=json";

#[derive(Deserialize)]
struct IpResponse {
    ip: String,
}

pub struct NetworkUtility {
    client: reqwest::Client,
    url: String,
}

impl NetworkUtility {
    pub fn new() -> Self {
        Self::with_url(IP_ECHO_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }

    async fn lookup(&self) -> Result<String, reqwest::Error> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        Ok(response.json::<IpResponse>().await?.ip)
    }
}

impl Default for NetworkUtility {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IpLookup for NetworkUtility {
    async fn public_ip(&self) -> Option<String> {
        info!(url = %self.url, "Getting public IP address");
        match self.lookup().await {
            Ok(ip) => {
                info!(ip = %ip, "Got public IP address");
                Some(ip)
            }
            Err(e) => {
                error!(error = ?e, url = %self.url, "Failed to get public IP address");
                None
            }
        }
    }
}
