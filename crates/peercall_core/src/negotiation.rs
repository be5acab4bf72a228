/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::anyhow;
use peercall_protocol::{
    IceCandidate, Inbound, RtcConfig, SdpKind, SessionDescription, SignalEnvelope, SignalPayload,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ice_config::IceConfigSource;
use crate::media::MediaSource;
use crate::peer::{
    ConnectionState, GatheringState, PeerConnector, PeerEvent, PeerEventEnvelope, PeerSlot,
    PeerStatus,
};
use crate::ui_events::{UiEvent, UiEventKind};

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call target is empty")]
    MissingTarget,
    #[error("no pending offer")]
    NoPendingOffer,
    #[error("no data channel open")]
    NoDataChannel,
    #[error("call attempt cancelled")]
    Cancelled,
    #[error("local media unavailable: {0:#}")]
    Media(anyhow::Error),
    #[error("negotiation failed: {0:#}")]
    Negotiation(anyhow::Error),
    #[error("signaling send failed: {0:#}")]
    Signaling(anyhow::Error),
    #[error("data channel send failed: {0:#}")]
    DataChannel(anyhow::Error),
}

/// Outbound half of the signaling transport.
pub trait SignalSink: Send + Sync {
    fn send(&self, envelope: SignalEnvelope) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallPhase {
    #[default]
    Idle,
    Ringing {
        caller: String,
    },
    Negotiating {
        peer: String,
        role: Role,
    },
    Connected {
        peer: String,
    },
}

impl CallPhase {
    fn is_busy(&self) -> bool {
        matches!(self, CallPhase::Negotiating { .. } | CallPhase::Connected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffer {
    pub from: String,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: Option<String>,
    pub phase: CallPhase,
    pub pending_offer_from: Option<String>,
    pub addressed_peer: Option<String>,
    pub peer_live: bool,
    pub has_media: bool,
    pub has_data_channel: bool,
    pub remote_description_set: bool,
    pub queued_candidates: usize,
}

#[derive(Debug, Clone)]
pub struct NegotiationSettings {
    pub data_channel_label: String,
    /// `None` waits for gathering to complete however long it takes.
    pub gathering_timeout: Option<Duration>,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            data_channel_label: "chat".to_string(),
            gathering_timeout: None,
        }
    }
}

pub struct CallDeps {
    pub connector: Arc<dyn PeerConnector>,
    pub ice: Arc<dyn IceConfigSource>,
    pub media: Arc<dyn MediaSource>,
    pub signals: Arc<dyn SignalSink>,
}

/// Everything one client session knows about its call.
struct NegotiationSession {
    identity: Option<String>,
    phase: CallPhase,
    pending_offer: Option<PendingOffer>,
    // Where local candidates go: the dialed target or the caller being answered.
    addressed_peer: Option<String>,
    // Remote peer the connection and its candidate queue were built for.
    slot_peer: Option<String>,
    attempt: Option<u64>,
    next_attempt: u64,
    peer: PeerSlot,
}

impl NegotiationSession {
    fn begin_attempt(&mut self) -> u64 {
        self.next_attempt += 1;
        self.attempt = Some(self.next_attempt);
        self.next_attempt
    }

    fn check_attempt(&self, id: u64) -> Result<(), CallError> {
        if self.attempt == Some(id) {
            Ok(())
        } else {
            Err(CallError::Cancelled)
        }
    }

    /// Back to idle with no connection. Returns false if there was nothing to tear down.
    async fn reset(&mut self) -> bool {
        let closed = self.peer.close().await;
        let had_offer = self.pending_offer.take().is_some();
        let was_active = self.phase != CallPhase::Idle || self.attempt.is_some();
        self.attempt = None;
        self.phase = CallPhase::Idle;
        self.addressed_peer = None;
        self.slot_peer = None;
        closed || had_offer || was_active
    }
}

struct Inner {
    session: Mutex<NegotiationSession>,
    deps: CallDeps,
    settings: NegotiationSettings,
    ui: broadcast::Sender<UiEvent>,
}

#[derive(Clone)]
pub struct CallController {
    inner: Arc<Inner>,
}

impl CallController {
    /// Returns the controller and the receiver of native peer events, which the caller
    /// must feed back through `handle_peer_event` (or `spawn_event_pump`).
    pub fn new(
        deps: CallDeps,
        settings: NegotiationSettings,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEventEnvelope>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ui, _) = broadcast::channel(256);
        let session = NegotiationSession {
            identity: None,
            phase: CallPhase::Idle,
            pending_offer: None,
            addressed_peer: None,
            slot_peer: None,
            attempt: None,
            next_attempt: 0,
            peer: PeerSlot::new(events_tx),
        };
        let inner = Inner {
            session: Mutex::new(session),
            deps,
            settings,
            ui,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn subscribe_ui(&self) -> broadcast::Receiver<UiEvent> {
        self.inner.ui.subscribe()
    }

    fn emit(&self, kind: UiEventKind) {
        let _ = self.inner.ui.send(UiEvent::new(kind));
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "peercall::ui", "{line}");
        let _ = self.inner.ui.send(UiEvent::log(line));
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let s = self.inner.session.lock().await;
        SessionSnapshot {
            identity: s.identity.clone(),
            phase: s.phase.clone(),
            pending_offer_from: s.pending_offer.as_ref().map(|o| o.from.clone()),
            addressed_peer: s.addressed_peer.clone(),
            peer_live: s.peer.is_live(),
            has_media: s.peer.has_media(),
            has_data_channel: s.peer.data_channel().is_some(),
            remote_description_set: s.peer.remote_description_set(),
            queued_candidates: s.peer.queued_candidates(),
        }
    }

    /// Locks the session, fetching an ICE configuration first whenever no connection is
    /// live. The fetch runs with the lock released.
    async fn lock_prepared(&self) -> (MutexGuard<'_, NegotiationSession>, Option<RtcConfig>) {
        let mut config = None;
        loop {
            let s = self.inner.session.lock().await;
            if config.is_some() || s.peer.is_live() {
                return (s, config);
            }
            drop(s);
            config = Some(self.inner.deps.ice.fetch().await);
        }
    }

    pub fn spawn_event_pump(
        &self,
        mut events: mpsc::UnboundedReceiver<PeerEventEnvelope>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(ev) = events.recv().await {
                this.handle_peer_event(ev).await;
            }
        })
    }

    /// Dispatches one inbound signaling envelope. Never fails; problems are logged.
    pub async fn handle_message(&self, envelope: SignalEnvelope) {
        match envelope.into_inbound() {
            Inbound::Identity(id) => self.on_identity(id).await,
            Inbound::Ignored => debug!("ignoring envelope without signal"),
            Inbound::Signal { from, payload } => match payload {
                SignalPayload::Description(desc) => match desc.kind {
                    SdpKind::Offer => self.on_offer(from, desc.sdp).await,
                    SdpKind::Answer => self.on_answer(from, desc).await,
                },
                SignalPayload::Candidate(c) => self.on_remote_candidate(from, c).await,
            },
        }
    }

    async fn on_identity(&self, id: String) {
        let mut s = self.inner.session.lock().await;
        match s.identity.as_deref() {
            None => {
                info!(%id, "session identity assigned");
                s.identity = Some(id.clone());
                self.emit(UiEventKind::IdentityAssigned { id });
            }
            Some(cur) if cur == id => debug!("identity re-announced"),
            Some(cur) => warn!(current = %cur, announced = %id, "ignoring identity change"),
        }
    }

    async fn on_offer(&self, from: Option<String>, sdp: String) {
        let Some(from) = from else {
            warn!("offer without sender ignored");
            return;
        };
        let (mut s, config) = loop {
            let (mut s, config) = self.lock_prepared().await;
            if s.phase.is_busy() {
                info!(caller = %from, "busy, ignoring offer");
                self.log(format!("Busy: ignored call from {from}"));
                return;
            }
            match s.slot_peer.clone() {
                Some(owner) if owner != from => {
                    debug!(previous = %owner, caller = %from, "new caller, rebuilding connection");
                    s.peer.close().await;
                    s.slot_peer = None;
                    if config.is_none() {
                        continue;
                    }
                }
                _ => {}
            }
            break (s, config);
        };
        if let Some(prev) = s.pending_offer.take() {
            debug!(previous = %prev.from, caller = %from, "pending offer replaced");
        }
        if let Err(e) = s.peer.ensure(config, self.inner.deps.connector.as_ref()).await {
            warn!("peer connection for incoming offer: {e:#}");
        }
        s.slot_peer = Some(from.clone());
        s.pending_offer = Some(PendingOffer {
            from: from.clone(),
            sdp,
        });
        s.phase = CallPhase::Ringing {
            caller: from.clone(),
        };
        info!(caller = %from, "incoming call");
        self.emit(UiEventKind::IncomingRinging { caller: from });
    }

    async fn on_answer(&self, from: Option<String>, desc: SessionDescription) {
        let mut s = self.inner.session.lock().await;
        if !s.peer.is_live() {
            warn!(from = ?from, "answer without a peer connection ignored");
            return;
        }
        if from.is_some() && from != s.slot_peer {
            warn!(from = ?from, expected = ?s.slot_peer, "answer from unexpected peer ignored");
            return;
        }
        match s.peer.apply_remote_description(desc).await {
            Ok(drained) => {
                info!(from = ?from, drained, "remote answer applied");
                if let CallPhase::Negotiating {
                    peer,
                    role: Role::Offerer,
                } = &s.phase
                {
                    let peer = peer.clone();
                    s.phase = CallPhase::Connected { peer };
                    self.emit(UiEventKind::Connected);
                }
            }
            Err(e) => {
                warn!(from = ?from, "answer not applied: {e:#}");
                self.log(format!("Answer not applied: {e:#}"));
            }
        }
    }

    /// Queues or applies a remote candidate. Candidates never create a connection; a
    /// sender other than the one the connection belongs to may only take over an idle slot.
    async fn on_remote_candidate(&self, from: Option<String>, candidate: IceCandidate) {
        let mut s = self.inner.session.lock().await;
        if let Some(from) = from {
            match s.slot_peer.clone() {
                Some(owner) if owner != from => {
                    if s.phase != CallPhase::Idle {
                        debug!(%from, %owner, "candidate from another peer dropped");
                        return;
                    }
                    s.peer.close().await;
                    s.slot_peer = Some(from);
                }
                Some(_) => {}
                None => s.slot_peer = Some(from),
            }
        }
        let outcome = s.peer.add_remote_candidate(candidate).await;
        debug!(?outcome, "remote candidate");
    }

    pub async fn handle_peer_event(&self, envelope: PeerEventEnvelope) {
        let mut s = self.inner.session.lock().await;
        if !s.peer.is_current(envelope.generation) {
            debug!(generation = envelope.generation, "stale peer event dropped");
            return;
        }
        match envelope.event {
            PeerEvent::LocalCandidate(c) => match s.addressed_peer.clone() {
                Some(to) => {
                    let env = SignalEnvelope::to_peer(&to, SignalPayload::Candidate(c));
                    if let Err(e) = self.inner.deps.signals.send(env) {
                        warn!(%to, "local candidate not sent: {e:#}");
                    }
                }
                None => debug!("no addressed peer, local candidate dropped"),
            },
            PeerEvent::GatheringState(state) => {
                debug!(?state, "ice gathering");
                s.peer.set_gathering(state);
            }
            PeerEvent::IceConnectionState(state) => self.log(format!("ICE state: {state}")),
            PeerEvent::ConnectionState(state) => {
                info!(?state, "peer connection state");
                if matches!(state, ConnectionState::Failed | ConnectionState::Disconnected) {
                    self.log(format!("Connection {state:?}"));
                }
            }
            PeerEvent::RemoteTrack {
                kind,
                track_id,
                stream_id,
            } => {
                info!(%kind, %track_id, "remote track");
                self.emit(UiEventKind::RemoteTrack {
                    media_kind: kind,
                    track_id,
                    stream_id,
                });
            }
            PeerEvent::RemoteDataChannel(dc) => {
                debug!(label = %dc.label(), "remote data channel bound");
                s.peer.bind_data_channel(dc);
            }
            PeerEvent::DataChannelOpen { label } => {
                self.log("Data channel open");
                self.emit(UiEventKind::DataChannelOpen { label });
            }
            PeerEvent::DataChannelMessage { label, text } => {
                debug!(%label, "data channel message");
                self.log(format!("Peer: {text}"));
                self.emit(UiEventKind::PeerMessage { text });
            }
        }
    }

    /// Dials `target`, replacing whatever call was in progress. Resolves once the offer
    /// has been sent; the answer arrives later through `handle_message`.
    pub async fn start_call(&self, target: &str) -> Result<(), CallError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(CallError::MissingTarget);
        }
        let id = {
            let mut s = self.inner.session.lock().await;
            s.reset().await;
            let id = s.begin_attempt();
            s.phase = CallPhase::Negotiating {
                peer: target.to_string(),
                role: Role::Offerer,
            };
            s.addressed_peer = Some(target.to_string());
            s.slot_peer = Some(target.to_string());
            id
        };
        info!(%target, attempt = id, "starting call");
        self.emit(UiEventKind::Dialing {
            target: target.to_string(),
        });
        let res = self.run_offer(id, target).await;
        self.finish_attempt(id, res).await
    }

    async fn run_offer(&self, id: u64, target: &str) -> Result<(), CallError> {
        let media = self
            .inner
            .deps
            .media
            .acquire()
            .await
            .map_err(CallError::Media)?;
        let (stream_id, tracks) = (media.stream_id.clone(), media.tracks.len());
        self.inner.session.lock().await.check_attempt(id)?;
        let status = {
            let (mut s, config) = self.lock_prepared().await;
            s.check_attempt(id)?;
            let conn = s
                .peer
                .ensure(config, self.inner.deps.connector.as_ref())
                .await
                .map_err(CallError::Negotiation)?;
            conn.add_local_media(&media)
                .await
                .map_err(CallError::Negotiation)?;
            s.peer.attach_media(media);
            let dc = conn
                .create_data_channel(&self.inner.settings.data_channel_label)
                .await
                .map_err(CallError::Negotiation)?;
            s.peer.bind_data_channel(dc);
            let offer = conn.create_offer().await.map_err(CallError::Negotiation)?;
            conn.set_local_description(offer)
                .await
                .map_err(CallError::Negotiation)?;
            s.peer.watch_status().ok_or(CallError::Cancelled)?
        };
        self.emit(UiEventKind::LocalMedia { stream_id, tracks });
        self.wait_for_gathering(status).await?;

        let mut s = self.inner.session.lock().await;
        s.check_attempt(id)?;
        let desc = s
            .peer
            .local_description()
            .await
            .ok_or_else(|| CallError::Negotiation(anyhow!("no local offer after gathering")))?;
        self.inner
            .deps
            .signals
            .send(SignalEnvelope::to_peer(target, SignalPayload::Description(desc)))
            .map_err(CallError::Signaling)?;
        s.attempt = None;
        info!(%target, "offer sent");
        self.log(format!("Calling {target}"));
        Ok(())
    }

    /// Accepts the pending offer and sends the answer back to its sender.
    pub async fn answer_call(&self) -> Result<(), CallError> {
        let (id, offer) = {
            let mut s = self.inner.session.lock().await;
            let offer = s.pending_offer.take().ok_or(CallError::NoPendingOffer)?;
            let id = s.begin_attempt();
            s.phase = CallPhase::Negotiating {
                peer: offer.from.clone(),
                role: Role::Answerer,
            };
            s.addressed_peer = Some(offer.from.clone());
            (id, offer)
        };
        info!(caller = %offer.from, attempt = id, "answering call");
        self.emit(UiEventKind::Connecting {
            peer: offer.from.clone(),
        });
        let res = self.run_answer(id, offer).await;
        self.finish_attempt(id, res).await
    }

    async fn run_answer(&self, id: u64, offer: PendingOffer) -> Result<(), CallError> {
        let media = self
            .inner
            .deps
            .media
            .acquire()
            .await
            .map_err(CallError::Media)?;
        let (stream_id, tracks) = (media.stream_id.clone(), media.tracks.len());
        self.inner.session.lock().await.check_attempt(id)?;
        let status = {
            let (mut s, config) = self.lock_prepared().await;
            s.check_attempt(id)?;
            let conn = s
                .peer
                .ensure(config, self.inner.deps.connector.as_ref())
                .await
                .map_err(CallError::Negotiation)?;
            conn.add_local_media(&media)
                .await
                .map_err(CallError::Negotiation)?;
            s.peer.attach_media(media);
            let drained = s
                .peer
                .apply_remote_description(SessionDescription::offer(offer.sdp))
                .await
                .map_err(CallError::Negotiation)?;
            debug!(drained, "remote offer applied");
            let answer = conn.create_answer().await.map_err(CallError::Negotiation)?;
            conn.set_local_description(answer)
                .await
                .map_err(CallError::Negotiation)?;
            s.peer.watch_status().ok_or(CallError::Cancelled)?
        };
        self.emit(UiEventKind::LocalMedia { stream_id, tracks });
        self.wait_for_gathering(status).await?;

        let mut s = self.inner.session.lock().await;
        s.check_attempt(id)?;
        let desc = s
            .peer
            .local_description()
            .await
            .ok_or_else(|| CallError::Negotiation(anyhow!("no local answer after gathering")))?;
        self.inner
            .deps
            .signals
            .send(SignalEnvelope::to_peer(&offer.from, SignalPayload::Description(desc)))
            .map_err(CallError::Signaling)?;
        s.attempt = None;
        s.phase = CallPhase::Connected {
            peer: offer.from.clone(),
        };
        info!(caller = %offer.from, "answer sent");
        self.emit(UiEventKind::Connected);
        Ok(())
    }

    /// Resolves once gathering completes, or with `Cancelled` if the connection closes first.
    async fn wait_for_gathering(
        &self,
        mut status: watch::Receiver<PeerStatus>,
    ) -> Result<(), CallError> {
        let wait = async move {
            let res = status
                .wait_for(|st| st.closed || st.gathering == GatheringState::Complete)
                .await
                .map(|st| st.closed);
            res
        };
        let closed = match self.inner.settings.gathering_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(?limit, "ice gathering timed out, sending gathered candidates");
                    Ok(false)
                }
            },
            None => wait.await,
        };
        match closed {
            Ok(false) => Ok(()),
            Ok(true) | Err(_) => Err(CallError::Cancelled),
        }
    }

    /// A failed attempt that is still current tears the session down; a superseded one
    /// leaves the session to whoever replaced it.
    async fn finish_attempt(&self, id: u64, res: Result<(), CallError>) -> Result<(), CallError> {
        let Err(err) = res else {
            return Ok(());
        };
        let mut s = self.inner.session.lock().await;
        if s.attempt == Some(id) {
            s.reset().await;
            drop(s);
            warn!(attempt = id, "call attempt failed: {err}");
            self.emit(UiEventKind::Ended);
        } else {
            debug!(attempt = id, "superseded call attempt: {err}");
        }
        Err(err)
    }

    /// Declines the pending offer. The caller is not notified.
    pub async fn reject_call(&self) -> Result<(), CallError> {
        let mut s = self.inner.session.lock().await;
        let offer = s.pending_offer.take().ok_or(CallError::NoPendingOffer)?;
        s.phase = CallPhase::Idle;
        drop(s);
        info!(caller = %offer.from, "call rejected");
        self.log(format!("Rejected call from {}", offer.from));
        self.emit(UiEventKind::Ended);
        Ok(())
    }

    /// Hangs up whatever is in progress. Calling it again is a no-op.
    pub async fn cancel_call(&self) {
        let mut s = self.inner.session.lock().await;
        if s.reset().await {
            drop(s);
            info!("call cancelled");
            self.log("Call ended");
            self.emit(UiEventKind::Ended);
        }
    }

    pub async fn send_message(&self, text: &str) -> Result<(), CallError> {
        let dc = {
            let s = self.inner.session.lock().await;
            s.peer.data_channel().ok_or(CallError::NoDataChannel)?
        };
        dc.send_text(text).await.map_err(CallError::DataChannel)?;
        self.log(format!("You: {text}"));
        Ok(())
    }
}
