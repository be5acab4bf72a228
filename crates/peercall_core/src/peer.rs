/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use peercall_protocol::{IceCandidate, RtcConfig, SessionDescription};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::candidate_queue::{apply_candidate, CandidateApply, CandidateQueue};
use crate::media::LocalMedia;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    async fn send_text(&self, text: &str) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// The native connection object. Implementations push their callbacks into the
/// `PeerEventSink` handed to `PeerConnector::connect`.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<()>;
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        config: RtcConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// Native callbacks, as named events.
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    GatheringState(GatheringState),
    IceConnectionState(String),
    ConnectionState(ConnectionState),
    RemoteTrack {
        kind: String,
        track_id: String,
        stream_id: String,
    },
    RemoteDataChannel(Arc<dyn DataChannel>),
    DataChannelOpen {
        label: String,
    },
    DataChannelMessage {
        label: String,
        text: String,
    },
}

pub struct PeerEventEnvelope {
    pub generation: u64,
    pub event: PeerEvent,
}

/// Tags events with the connection they came from, so events of a replaced
/// connection can be told apart.
#[derive(Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEventEnvelope>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<PeerEventEnvelope>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(PeerEventEnvelope {
            generation: self.generation,
            event,
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStatus {
    pub gathering: GatheringState,
    pub closed: bool,
}

struct ActivePeer {
    generation: u64,
    conn: Arc<dyn PeerConnection>,
    media: Option<LocalMedia>,
    data_channel: Option<Arc<dyn DataChannel>>,
    status: watch::Sender<PeerStatus>,
}

/// Owner of the single live peer connection plus everything tied to its lifetime:
/// local media, data channel, the remote-description flag and the candidate queue.
pub struct PeerSlot {
    active: Option<ActivePeer>,
    remote_description_set: bool,
    candidates: CandidateQueue,
    next_generation: u64,
    events: mpsc::UnboundedSender<PeerEventEnvelope>,
}

impl PeerSlot {
    pub fn new(events: mpsc::UnboundedSender<PeerEventEnvelope>) -> Self {
        Self {
            active: None,
            remote_description_set: false,
            candidates: CandidateQueue::default(),
            next_generation: 0,
            events,
        }
    }

    /// Returns the live connection, or builds one from `config`. The configuration is
    /// fetched by the caller beforehand so the network never sits inside this call.
    pub async fn ensure(
        &mut self,
        config: Option<RtcConfig>,
        connector: &dyn PeerConnector,
    ) -> Result<Arc<dyn PeerConnection>> {
        if let Some(active) = &self.active {
            return Ok(active.conn.clone());
        }
        let config = config.ok_or_else(|| anyhow!("no ice configuration prepared"))?;
        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = PeerEventSink::new(generation, self.events.clone());
        let conn = connector
            .connect(config, sink)
            .await
            .context("create peer connection")?;
        let (status, _) = watch::channel(PeerStatus::default());
        self.active = Some(ActivePeer {
            generation,
            conn: conn.clone(),
            media: None,
            data_channel: None,
            status,
        });
        self.remote_description_set = false;
        info!(generation, "peer connection created");
        Ok(conn)
    }

    /// Releases the connection and everything it owns. No-op without a live connection.
    pub async fn close(&mut self) -> bool {
        self.remote_description_set = false;
        let dropped = self.candidates.clear();
        let Some(active) = self.active.take() else {
            return false;
        };
        active.status.send_modify(|st| st.closed = true);
        if let Some(dc) = &active.data_channel {
            if let Err(e) = dc.close().await {
                debug!("data channel close failed: {e:#}");
            }
        }
        if let Err(e) = active.conn.close().await {
            warn!(generation = active.generation, "peer connection close failed: {e:#}");
        }
        info!(
            generation = active.generation,
            dropped_candidates = dropped,
            "peer connection closed"
        );
        true
    }

    pub fn is_live(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.active.as_ref().map(|a| a.generation) == Some(generation)
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn queued_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn attach_media(&mut self, media: LocalMedia) {
        if let Some(active) = self.active.as_mut() {
            active.media = Some(media);
        }
    }

    pub fn has_media(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.media.is_some())
    }

    pub fn bind_data_channel(&mut self, dc: Arc<dyn DataChannel>) {
        if let Some(active) = self.active.as_mut() {
            active.data_channel = Some(dc);
        }
    }

    pub fn data_channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.active.as_ref().and_then(|a| a.data_channel.clone())
    }

    pub fn watch_status(&self) -> Option<watch::Receiver<PeerStatus>> {
        self.active.as_ref().map(|a| a.status.subscribe())
    }

    pub fn set_gathering(&self, state: GatheringState) {
        if let Some(active) = &self.active {
            active.status.send_modify(|st| st.gathering = state);
        }
    }

    pub async fn local_description(&self) -> Option<SessionDescription> {
        match &self.active {
            Some(active) => active.conn.local_description().await,
            None => None,
        }
    }

    /// Applies a remote description, then flushes the candidate queue.
    /// Returns how many queued candidates were applied.
    pub async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<usize> {
        let conn = self
            .active
            .as_ref()
            .map(|a| a.conn.clone())
            .ok_or_else(|| anyhow!("no live peer connection"))?;
        let kind = desc.kind.as_str();
        conn.set_remote_description(desc)
            .await
            .with_context(|| format!("set remote {kind}"))?;
        self.remote_description_set = true;
        Ok(self.candidates.drain_and_apply(conn.as_ref()).await)
    }

    /// Queues the candidate until a remote description is in place, otherwise applies it.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateOutcome {
        let conn = match (&self.active, self.remote_description_set) {
            (Some(active), true) => active.conn.clone(),
            _ => {
                debug!(candidate = %candidate.candidate, "queued until remote description is set");
                self.candidates.enqueue(candidate);
                return CandidateOutcome::Queued;
            }
        };
        match apply_candidate(conn.as_ref(), candidate).await {
            CandidateApply::Applied => CandidateOutcome::Applied,
            CandidateApply::Skipped => CandidateOutcome::Skipped,
            CandidateApply::Failed => CandidateOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Queued,
    Applied,
    Skipped,
    Failed,
}
