/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::ice_config::HttpIceConfigSource;
use crate::media::SyntheticMediaSource;
use crate::negotiation::{CallController, CallDeps, CallError};
use crate::peer::PeerEventEnvelope;
use crate::signaling::{self, SignalingConnection};
use crate::ui_events::UiEvent;
use crate::webrtc_peer::WebrtcConnector;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(LevelFilter::INFO.into()),
        )
        .try_init()
        .ok();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Call(String),
    Answer,
    Reject,
    Hangup,
    Send(String),
    Status,
}

pub const USAGE: &str =
    "commands: call <peer-id> | answer | reject | hangup | send <text> | status";

impl UserCommand {
    /// Parses one shell line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };
        let cmd = match word.to_ascii_lowercase().as_str() {
            "call" | "dial" => UserCommand::Call(rest.to_string()),
            "answer" | "accept" => UserCommand::Answer,
            "reject" | "decline" => UserCommand::Reject,
            "hangup" | "cancel" | "end" => UserCommand::Hangup,
            "send" | "say" => {
                if rest.is_empty() {
                    bail!("nothing to send");
                }
                UserCommand::Send(rest.to_string())
            }
            "status" => UserCommand::Status,
            other => bail!("unknown command {other:?}; {USAGE}"),
        };
        Ok(Some(cmd))
    }
}

pub struct Client {
    controller: CallController,
    signaling: SignalingConnection,
    peer_events: mpsc::UnboundedReceiver<PeerEventEnvelope>,
}

/// Connects to the relay and assembles a controller backed by webrtc-rs.
pub async fn connect(cfg: &CallConfig, shutdown: watch::Receiver<bool>) -> Result<Client> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("build http client")?;
    let ice = HttpIceConfigSource::new(
        http,
        &cfg.ice_config_url,
        &cfg.fallback_stun_url,
        cfg.http_retry_attempts,
    );
    let connector = WebrtcConnector::new()?;
    let signaling = signaling::connect(&cfg.signaling_url, cfg.ping_interval(), shutdown).await?;
    let deps = CallDeps {
        connector: Arc::new(connector),
        ice: Arc::new(ice),
        media: Arc::new(SyntheticMediaSource::new(cfg.media)),
        signals: Arc::new(signaling.handle.clone()),
    };
    let (controller, peer_events) = CallController::new(deps, cfg.negotiation_settings());
    info!(signaling = %cfg.signaling_url, "client ready");
    Ok(Client {
        controller,
        signaling,
        peer_events,
    })
}

impl Client {
    pub fn controller(&self) -> &CallController {
        &self.controller
    }

    pub fn subscribe_ui(&self) -> broadcast::Receiver<UiEvent> {
        self.controller.subscribe_ui()
    }

    /// Drives the session until shutdown, the command source ends or the relay hangs up.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<UserCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let Client {
            controller,
            signaling,
            mut peer_events,
        } = self;
        let SignalingConnection {
            mut inbound,
            mut task,
            ..
        } = signaling;

        // Inbound signals keep their order in one task; an ICE fetch for an offer then
        // never holds up commands or peer events.
        let mut inbound_pump = {
            let controller = controller.clone();
            tokio::spawn(async move {
                while let Some(env) = inbound.recv().await {
                    controller.handle_message(env).await;
                }
            })
        };

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = &mut inbound_pump => {
                    warn!("signaling connection lost");
                    break;
                }
                ev = peer_events.recv() => {
                    let Some(ev) = ev else { break; };
                    controller.handle_peer_event(ev).await;
                }
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break; };
                    dispatch(&controller, cmd).await;
                }
            }
        }

        inbound_pump.abort();
        controller.cancel_call().await;
        match tokio::time::timeout(Duration::from_secs(2), &mut task).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => {
                warn!("signaling task join: {e}");
                Ok(())
            }
            Err(_) => {
                task.abort();
                Ok(())
            }
        }
    }
}

fn report(controller: &CallController, res: Result<(), CallError>) {
    match res {
        Ok(()) => {}
        Err(CallError::Cancelled) => debug!("call attempt cancelled"),
        Err(e) => controller.log(e.to_string()),
    }
}

async fn dispatch(controller: &CallController, cmd: UserCommand) {
    match cmd {
        // Offer/answer wait on ICE gathering; run them beside the loop so events keep flowing.
        UserCommand::Call(target) => {
            let c = controller.clone();
            tokio::spawn(async move {
                let res = c.start_call(&target).await;
                report(&c, res);
            });
        }
        UserCommand::Answer => {
            let c = controller.clone();
            tokio::spawn(async move {
                let res = c.answer_call().await;
                report(&c, res);
            });
        }
        UserCommand::Reject => report(controller, controller.reject_call().await),
        UserCommand::Hangup => controller.cancel_call().await,
        UserCommand::Send(text) => report(controller, controller.send_message(&text).await),
        UserCommand::Status => {
            let snap = controller.snapshot().await;
            controller.log(format!(
                "id={} phase={:?} pending={} peer_live={} remote_desc={} queued={}",
                snap.identity.as_deref().unwrap_or("-"),
                snap.phase,
                snap.pending_offer_from.as_deref().unwrap_or("-"),
                snap.peer_live,
                snap.remote_description_set,
                snap.queued_candidates,
            ));
        }
    }
}
