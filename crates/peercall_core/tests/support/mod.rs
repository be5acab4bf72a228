/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use peercall_core::ice_config::{IceConfigSource, StaticIceConfig, DEFAULT_STUN_URL};
use peercall_core::media::{LocalMedia, MediaSource, MediaTrack, TrackKind};
use peercall_core::negotiation::{CallController, CallDeps, NegotiationSettings, SignalSink};
use peercall_core::peer::{
    DataChannel, GatheringState, PeerConnection, PeerConnector, PeerEvent, PeerEventSink,
};
use peercall_core::ui_events::{UiEvent, UiEventKind};
use peercall_protocol::{
    IceCandidate, RtcConfig, SdpKind, SessionDescription, SignalEnvelope, SignalPayload,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    AddMedia(usize),
    DataChannel(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    Candidate(String),
    Close,
}

pub struct FakeChannel {
    label: String,
    pub sent: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

impl FakeChannel {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DataChannel for FakeChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("channel closed");
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every native call. With `auto_gather` it reports one local candidate and
/// gathering completion as soon as a local description is set.
pub struct FakePeer {
    events: PeerEventSink,
    auto_gather: bool,
    pub ops: Mutex<Vec<Op>>,
    pub channels: Mutex<Vec<Arc<FakeChannel>>>,
    local: Mutex<Option<SessionDescription>>,
    pub closed: AtomicBool,
}

impl FakePeer {
    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Candidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn emit(&self, event: PeerEvent) {
        self.events.emit(event);
    }

    pub fn finish_gathering(&self) {
        self.emit(PeerEvent::GatheringState(GatheringState::Complete));
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<()> {
        self.record(Op::AddMedia(media.tracks.len()));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        self.record(Op::DataChannel(label.to_string()));
        let dc = Arc::new(FakeChannel::new(label));
        self.channels.lock().unwrap().push(dc.clone());
        Ok(dc)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(Op::CreateOffer);
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(Op::CreateAnswer);
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(Op::SetLocal(desc.kind));
        *self.local.lock().unwrap() = Some(desc);
        if self.auto_gather {
            self.emit(PeerEvent::GatheringState(GatheringState::Gathering));
            let local = candidate("candidate:local 1 udp 1 10.0.0.9 4000 typ host");
            self.emit(PeerEvent::LocalCandidate(local));
            self.finish_gathering();
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let has_local_offer = matches!(
            self.local.lock().unwrap().as_ref().map(|d| d.kind),
            Some(SdpKind::Offer)
        );
        if desc.kind == SdpKind::Answer && !has_local_offer {
            return Err(anyhow!("answer without outstanding offer"));
        }
        self.record(Op::SetRemote(desc.kind));
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(Op::Candidate(candidate.candidate.clone()));
        if candidate.candidate.contains("bad") {
            bail!("malformed candidate");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Op::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnector {
    auto_gather: bool,
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
    pub configs: Mutex<Vec<RtcConfig>>,
}

impl FakeConnector {
    pub fn new(auto_gather: bool) -> Self {
        Self {
            auto_gather,
            peers: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakePeer> {
        self.peers.lock().unwrap().last().cloned().expect("a peer connection")
    }

    pub fn nth(&self, i: usize) -> Arc<FakePeer> {
        self.peers.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        config: RtcConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        self.configs.lock().unwrap().push(config);
        let peer = Arc::new(FakePeer {
            events,
            auto_gather: self.auto_gather,
            ops: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// With a `gate`, acquisition parks until the gate is notified.
#[derive(Default)]
pub struct FakeMedia {
    pub fail: bool,
    pub gate: Option<Arc<Notify>>,
    pub entered: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&self) -> Result<LocalMedia> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            bail!("permission denied");
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let tracks = vec![
            MediaTrack {
                id: "mic".into(),
                kind: TrackKind::Audio,
            },
            MediaTrack {
                id: "cam".into(),
                kind: TrackKind::Video,
            },
        ];
        let guard = ReleaseGuard(self.released.clone());
        Ok(LocalMedia::new("fake-stream", tracks).with_device(guard))
    }
}

/// Answers with the fallback descriptor after `delay`, counting fetches.
pub struct SlowIce {
    delay: Duration,
    fetches: AtomicUsize,
}

impl SlowIce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IceConfigSource for SlowIce {
    async fn fetch(&self) -> RtcConfig {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        RtcConfig::fallback(DEFAULT_STUN_URL)
    }
}

#[derive(Default)]
pub struct RecordingSignals {
    pub sent: Mutex<Vec<SignalEnvelope>>,
}

impl RecordingSignals {
    pub fn all(&self) -> Vec<SignalEnvelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn descriptions(&self) -> Vec<(String, SessionDescription)> {
        self.all()
            .into_iter()
            .filter_map(|env| match env.signal {
                Some(SignalPayload::Description(d)) => Some((env.to.unwrap_or_default(), d)),
                _ => None,
            })
            .collect()
    }

    pub fn candidates(&self) -> Vec<(String, IceCandidate)> {
        self.all()
            .into_iter()
            .filter_map(|env| match env.signal {
                Some(SignalPayload::Candidate(c)) => Some((env.to.unwrap_or_default(), c)),
                _ => None,
            })
            .collect()
    }
}

impl SignalSink for RecordingSignals {
    fn send(&self, envelope: SignalEnvelope) -> Result<()> {
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

pub struct Harness {
    pub controller: CallController,
    pub connector: Arc<FakeConnector>,
    pub media: Arc<FakeMedia>,
    pub signals: Arc<RecordingSignals>,
    pub ui: broadcast::Receiver<UiEvent>,
}

pub struct HarnessOpts {
    pub auto_gather: bool,
    pub media_fails: bool,
    pub media_gate: Option<Arc<Notify>>,
    pub gathering_timeout: Option<Duration>,
    pub ice: Option<Arc<dyn IceConfigSource>>,
}

impl Default for HarnessOpts {
    fn default() -> Self {
        Self {
            auto_gather: true,
            media_fails: false,
            media_gate: None,
            gathering_timeout: None,
            ice: None,
        }
    }
}

pub fn harness(opts: HarnessOpts) -> Harness {
    let connector = Arc::new(FakeConnector::new(opts.auto_gather));
    let media = Arc::new(FakeMedia {
        fail: opts.media_fails,
        gate: opts.media_gate,
        ..Default::default()
    });
    let signals = Arc::new(RecordingSignals::default());
    let ice: Arc<dyn IceConfigSource> = match opts.ice {
        Some(ice) => ice,
        None => Arc::new(StaticIceConfig(RtcConfig::fallback(DEFAULT_STUN_URL))),
    };
    let deps = CallDeps {
        connector: connector.clone(),
        ice,
        media: media.clone(),
        signals: signals.clone(),
    };
    let settings = NegotiationSettings {
        gathering_timeout: opts.gathering_timeout,
        ..Default::default()
    };
    let (controller, events) = CallController::new(deps, settings);
    let ui = controller.subscribe_ui();
    controller.spawn_event_pump(events);
    Harness {
        controller,
        connector,
        media,
        signals,
        ui,
    }
}

impl Harness {
    pub fn ui_kinds(&mut self) -> Vec<UiEventKind> {
        let mut out = Vec::new();
        while let Ok(ev) = self.ui.try_recv() {
            out.push(ev.kind);
        }
        out
    }
}

pub fn candidate(line: &str) -> IceCandidate {
    IceCandidate {
        candidate: line.to_string(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

pub fn from_peer(from: &str, payload: SignalPayload) -> SignalEnvelope {
    SignalEnvelope {
        from: Some(from.to_string()),
        to: Some("me".to_string()),
        signal: Some(payload),
    }
}

pub fn offer_from(from: &str) -> SignalEnvelope {
    from_peer(from, SignalPayload::Description(SessionDescription::offer("v=0 remote-offer")))
}

pub fn answer_from(from: &str) -> SignalEnvelope {
    from_peer(from, SignalPayload::Description(SessionDescription::answer("v=0 remote-answer")))
}

pub fn candidate_from(from: &str, line: &str) -> SignalEnvelope {
    from_peer(from, SignalPayload::Candidate(candidate(line)))
}

/// Lets the event pump catch up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
