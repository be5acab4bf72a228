/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use peercall_protocol::{IceCandidate, RtcConfig, SdpKind, SessionDescription};
use std::sync::Arc;
use tracing::{debug, info};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::media::{LocalMedia, TrackKind};
use crate::peer::{
    ConnectionState, DataChannel, GatheringState, PeerConnection, PeerConnector, PeerEvent,
    PeerEventSink,
};

fn build_ice_servers(cfg: &RtcConfig) -> Vec<RTCIceServer> {
    cfg.ice_servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.to_vec(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let out = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    out.context("build session description")
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => return Err(anyhow!("unsupported sdp type {other}")),
    };
    Ok(SessionDescription { kind, sdp: desc.sdp })
}

fn map_gathering(state: RTCIceGathererState) -> GatheringState {
    match state {
        RTCIceGathererState::Complete => GatheringState::Complete,
        RTCIceGathererState::Gathering => GatheringState::Gathering,
        _ => GatheringState::New,
    }
}

fn map_connection(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

pub struct WebrtcConnector {
    api: API,
}

impl WebrtcConnector {
    pub fn new() -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().context("register codecs")?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .context("register interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnector for WebrtcConnector {
    async fn connect(
        &self,
        config: RtcConfig,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(RTCConfiguration {
                ice_servers: build_ice_servers(&config),
                ..Default::default()
            })
            .await
            .context("new peer connection")?;
        let pc = Arc::new(pc);
        wire_callbacks(&pc, &events);
        Ok(Arc::new(WebrtcPeer { pc, events }))
    }
}

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, events: &PeerEventSink) {
    {
        let events = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                // None marks the end of gathering; the gathering-state event covers it.
                let Some(cand) = cand else { return };
                match cand.to_json() {
                    Ok(init) => events.emit(PeerEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    })),
                    Err(e) => debug!("local candidate not serializable: {e}"),
                }
            })
        }));
    }
    {
        let events = events.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            events.emit(PeerEvent::GatheringState(map_gathering(state)));
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            events.emit(PeerEvent::IceConnectionState(state.to_string()));
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            events.emit(PeerEvent::ConnectionState(map_connection(state)));
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                events.emit(PeerEvent::RemoteTrack {
                    kind: track.kind().to_string(),
                    track_id: track.id(),
                    stream_id: track.stream_id(),
                });
                Box::pin(async {})
            },
        ));
    }
    {
        let events = events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            Box::pin(async move {
                info!(label = %dc.label(), "remote data channel");
                wire_data_channel(&dc, &events);
                events.emit(PeerEvent::RemoteDataChannel(Arc::new(WebrtcDataChannel { dc })));
            })
        }));
    }
}

fn wire_data_channel(dc: &Arc<RTCDataChannel>, events: &PeerEventSink) {
    let label = dc.label().to_string();
    {
        let events = events.clone();
        let label = label.clone();
        dc.on_open(Box::new(move || {
            events.emit(PeerEvent::DataChannelOpen { label });
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            events.emit(PeerEvent::DataChannelMessage {
                label: label.clone(),
                text,
            });
            Box::pin(async {})
        }));
    }
}

struct WebrtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: PeerEventSink,
}

#[async_trait]
impl PeerConnection for WebrtcPeer {
    async fn add_local_media(&self, media: &LocalMedia) -> Result<()> {
        for track in &media.tracks {
            let mime_type = match track.kind {
                TrackKind::Audio => MIME_TYPE_OPUS,
                TrackKind::Video => MIME_TYPE_VP8,
            };
            let local: Arc<dyn TrackLocal + Send + Sync> = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                track.id.clone(),
                media.stream_id.clone(),
            ));
            self.pc
                .add_track(local)
                .await
                .with_context(|| format!("add track {}", track.id))?;
        }
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .context("create data channel")?;
        wire_data_channel(&dc, &self.events);
        Ok(Arc::new(WebrtcDataChannel { dc }))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.context("create offer")?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.context("create answer")?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .context("set local description")
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .context("set remote description")
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        from_rtc_description(desc).ok()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .context("add ice candidate")
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.context("close peer connection")
    }
}

struct WebrtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebrtcDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.dc
            .send_text(text.to_string())
            .await
            .context("data channel send")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc.close().await.context("data channel close")
    }
}
