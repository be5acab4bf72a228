/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// A captured local stream. Dropping it releases the capture device.
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<MediaTrack>,
    device: Option<Box<dyn Any + Send + Sync>>,
}

impl LocalMedia {
    pub fn new(stream_id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks,
            device: None,
        }
    }

    /// Ties a device handle to this stream so it is released together with it.
    pub fn with_device(mut self, device: impl Any + Send + Sync) -> Self {
        self.device = Some(Box::new(device));
        self
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        let had_device = self.device.take().is_some();
        debug!(
            stream = %self.stream_id,
            tracks = self.tracks.len(),
            had_device,
            "local media released"
        );
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia>;
}

/// Track descriptors with no capture device behind them; the peer still negotiates
/// audio/video sections for them.
pub struct SyntheticMediaSource {
    constraints: MediaConstraints,
}

impl SyntheticMediaSource {
    pub fn new(constraints: MediaConstraints) -> Self {
        Self { constraints }
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self) -> Result<LocalMedia> {
        let mut tracks = Vec::new();
        if self.constraints.audio {
            tracks.push(MediaTrack {
                id: "audio0".to_string(),
                kind: TrackKind::Audio,
            });
        }
        if self.constraints.video {
            tracks.push(MediaTrack {
                id: "video0".to_string(),
                kind: TrackKind::Video,
            });
        }
        if tracks.is_empty() {
            bail!("media constraints request neither audio nor video");
        }
        Ok(LocalMedia::new("local", tracks))
    }
}
