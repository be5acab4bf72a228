/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ice_config::DEFAULT_STUN_URL;
use crate::media::MediaConstraints;
use crate::negotiation::NegotiationSettings;

const SIGNALING_PATH: &str = "/webrtc-signaling/ws";
const RTC_CONFIG_PATH: &str = "/webrtc-signaling/api/rtc-config";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub signaling_url: String,
    pub ice_config_url: String,
    pub fallback_stun_url: String,
    pub data_channel_label: String,
    pub http_retry_attempts: u32,
    /// Unset waits for ICE gathering to complete with no limit.
    pub gathering_timeout_secs: Option<u64>,
    pub ping_secs: u64,
    pub media: MediaConstraints,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self::for_relay("ws://127.0.0.1:8080").unwrap_or_else(|_| Self::bare())
    }
}

impl CallConfig {
    fn bare() -> Self {
        Self {
            signaling_url: String::new(),
            ice_config_url: String::new(),
            fallback_stun_url: DEFAULT_STUN_URL.to_string(),
            data_channel_label: "chat".to_string(),
            http_retry_attempts: 2,
            gathering_timeout_secs: None,
            ping_secs: 20,
            media: MediaConstraints::default(),
        }
    }

    /// Derives both relay endpoints from a base such as `wss://relay.example` or
    /// `https://relay.example/anything`.
    pub fn for_relay(base: &str) -> Result<Self> {
        let base = base.trim();
        let (secure, rest) = if let Some(r) = base.strip_prefix("wss://") {
            (true, r)
        } else if let Some(r) = base.strip_prefix("ws://") {
            (false, r)
        } else if let Some(r) = base.strip_prefix("https://") {
            (true, r)
        } else if let Some(r) = base.strip_prefix("http://") {
            (false, r)
        } else {
            bail!("relay url must start with ws://, wss://, http:// or https:// (got: {base})");
        };
        let host = rest.split('/').next().unwrap_or("").trim();
        if host.is_empty() {
            bail!("relay url missing host (got: {base})");
        }
        let (ws, http) = if secure { ("wss", "https") } else { ("ws", "http") };
        Ok(Self {
            signaling_url: format!("{ws}://{host}{SIGNALING_PATH}"),
            ice_config_url: format!("{http}://{host}{RTC_CONFIG_PATH}"),
            ..Self::bare()
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parse call config")
    }

    /// `PEERCALL_CONFIG` (json file) or `PEERCALL_RELAY`, then `PEERCALL_*` overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(path) = std::env::var("PEERCALL_CONFIG") {
            let text = std::fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
            Self::from_json(&text)?
        } else if let Ok(relay) = std::env::var("PEERCALL_RELAY") {
            Self::for_relay(&relay)?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("PEERCALL_SIGNALING_URL") {
            self.signaling_url = v;
        }
        if let Some(v) = get("PEERCALL_ICE_CONFIG_URL") {
            self.ice_config_url = v;
        }
        if let Some(v) = get("PEERCALL_STUN_URL") {
            self.fallback_stun_url = v;
        }
        if let Some(v) = get("PEERCALL_DATA_CHANNEL") {
            self.data_channel_label = v;
        }
        if let Some(v) = get("PEERCALL_HTTP_RETRIES") {
            self.http_retry_attempts = v.trim().parse().context("PEERCALL_HTTP_RETRIES")?;
        }
        if let Some(v) = get("PEERCALL_GATHERING_TIMEOUT_SECS") {
            let v = v.trim();
            self.gathering_timeout_secs = if v.is_empty() || v == "0" {
                None
            } else {
                Some(v.parse().context("PEERCALL_GATHERING_TIMEOUT_SECS")?)
            };
        }
        if let Some(v) = get("PEERCALL_AUDIO") {
            self.media.audio = parse_bool(&v);
        }
        if let Some(v) = get("PEERCALL_VIDEO") {
            self.media.video = parse_bool(&v);
        }
        Ok(())
    }

    pub fn negotiation_settings(&self) -> NegotiationSettings {
        NegotiationSettings {
            data_channel_label: self.data_channel_label.clone(),
            gathering_timeout: self.gathering_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_secs.max(1))
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn relay_base_derives_endpoints() {
        let cfg = CallConfig::for_relay("https://relay.example/some/page").unwrap();
        assert_eq!(cfg.signaling_url, "wss://relay.example/webrtc-signaling/ws");
        assert_eq!(cfg.ice_config_url, "https://relay.example/webrtc-signaling/api/rtc-config");

        let cfg = CallConfig::for_relay("ws://127.0.0.1:9000").unwrap();
        assert_eq!(cfg.signaling_url, "ws://127.0.0.1:9000/webrtc-signaling/ws");
        assert_eq!(cfg.ice_config_url, "http://127.0.0.1:9000/webrtc-signaling/api/rtc-config");

        assert!(CallConfig::for_relay("relay.example").is_err());
        assert!(CallConfig::for_relay("wss:///x").is_err());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let raw = r#"{"data_channel_label":"talk","media":{"video":false}}"#;
        let cfg = CallConfig::from_json(raw).unwrap();
        assert_eq!(cfg.data_channel_label, "talk");
        assert!(cfg.media.audio);
        assert!(!cfg.media.video);
        assert_eq!(cfg.fallback_stun_url, DEFAULT_STUN_URL);
        assert_eq!(cfg.negotiation_settings().gathering_timeout, None);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("PEERCALL_GATHERING_TIMEOUT_SECS", "5"),
            ("PEERCALL_VIDEO", "off"),
            ("PEERCALL_HTTP_RETRIES", "3"),
        ]
        .into_iter()
        .collect();
        let mut cfg = CallConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.negotiation_settings().gathering_timeout, Some(Duration::from_secs(5)));
        assert!(!cfg.media.video);
        assert_eq!(cfg.http_retry_attempts, 3);

        let mut cfg = CallConfig::default();
        assert!(cfg
            .apply_env_overrides(|k| (k == "PEERCALL_HTTP_RETRIES").then(|| "many".to_string()))
            .is_err());
    }
}
