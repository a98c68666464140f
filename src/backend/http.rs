//! HTTP persistence collaborator
//!
//! Talks to the application's mutation API with reqwest. Normal flushes are
//! awaited; beacons are posted from a detached task and never awaited.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::{BeaconRequest, BeaconTransport, LikeWrite, NotificationWrite, SyncBackend};
use crate::config::BackendConfig;
use crate::error::{Result, SyncError};

const LIKES_PATH: &str = "/api/likes";
const NOTIFICATIONS_PATH: &str = "/api/notifications";

fn build_client(config: &BackendConfig) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()?)
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Mutation API client
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.base_url.clone(),
        })
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = join_url(&self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Write accepted");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(SyncError::Backend {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SyncBackend for HttpBackend {
    async fn set_like(&self, write: &LikeWrite) -> Result<()> {
        self.post_json(LIKES_PATH, write).await
    }

    async fn mark_notifications(&self, write: &NotificationWrite) -> Result<()> {
        self.post_json(NOTIFICATIONS_PATH, write).await
    }
}

/// Beacon transport for process teardown.
///
/// Each beacon is spawned onto the current tokio runtime and left to run;
/// the caller gives it a grace period before exiting.
#[derive(Clone)]
pub struct HttpBeacon {
    client: Client,
    url: String,
}

impl HttpBeacon {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            url: join_url(&config.base_url, &config.beacon_path),
        })
    }
}

impl BeaconTransport for HttpBeacon {
    fn send_beacon(&self, request: BeaconRequest) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(lane = %request.lane, "No runtime available, beacon dropped");
                return false;
            }
        };

        let client = self.client.clone();
        let url = self.url.clone();
        handle.spawn(async move {
            let lane = request.lane;
            match client.post(&url).json(&request).send().await {
                Ok(response) => debug!(%lane, status = response.status().as_u16(), "Beacon delivered"),
                Err(e) => debug!(%lane, error = %e, "Beacon delivery failed"),
            }
        });
        true
    }
}
