/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use peercall_protocol::RtcConfig;
use tracing::{info, warn};

use crate::http_retry::{send_with_retry, RetryPolicy};

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Where a new peer connection gets its ICE servers from. Never fails: sources
/// fall back to a default descriptor instead.
#[async_trait]
pub trait IceConfigSource: Send + Sync {
    async fn fetch(&self) -> RtcConfig;
}

pub struct StaticIceConfig(pub RtcConfig);

#[async_trait]
impl IceConfigSource for StaticIceConfig {
    async fn fetch(&self) -> RtcConfig {
        self.0.clone()
    }
}

pub struct HttpIceConfigSource {
    http: reqwest::Client,
    url: String,
    fallback_stun_url: String,
    retry: RetryPolicy,
}

impl HttpIceConfigSource {
    pub fn new(http: reqwest::Client, url: &str, fallback_stun_url: &str, attempts: u32) -> Self {
        Self {
            http,
            url: url.trim().to_string(),
            fallback_stun_url: fallback_stun_url.to_string(),
            retry: RetryPolicy::new(attempts),
        }
    }

    async fn try_fetch(&self) -> Result<RtcConfig> {
        let resp = send_with_retry(
            || self.http.get(&self.url).header("Accept", "application/json"),
            self.retry,
        )
        .await
        .context("rtc config request")?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("rtc config fetch failed: {status} {text}"));
        }
        serde_json::from_str(&text).context("parse rtc config")
    }
}

#[async_trait]
impl IceConfigSource for HttpIceConfigSource {
    async fn fetch(&self) -> RtcConfig {
        match self.try_fetch().await {
            Ok(cfg) => {
                info!(servers = cfg.ice_servers.len(), "fetched rtc config");
                cfg
            }
            Err(e) => {
                warn!(url = %self.url, "rtc config unavailable, using fallback: {e:#}");
                RtcConfig::fallback(&self.fallback_stun_url)
            }
        }
    }
}
