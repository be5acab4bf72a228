/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use peercall_protocol::SignalEnvelope;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::negotiation::SignalSink;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
pub struct SignalingHandle {
    tx: mpsc::UnboundedSender<SignalEnvelope>,
}

impl SignalSink for SignalingHandle {
    fn send(&self, envelope: SignalEnvelope) -> Result<()> {
        self.tx
            .send(envelope)
            .map_err(|_| anyhow!("signaling connection closed"))
    }
}

pub struct SignalingConnection {
    pub handle: SignalingHandle,
    pub inbound: mpsc::Receiver<SignalEnvelope>,
    pub task: JoinHandle<Result<()>>,
}

pub async fn connect(
    url: &str,
    ping_every: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<SignalingConnection> {
    info!(%url, "connecting signaling");
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("signaling connect {url}"))?;
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::channel(64);
    let task = tokio::spawn(pump(ws, out_rx, in_tx, ping_every, shutdown));
    Ok(SignalingConnection {
        handle: SignalingHandle { tx: out_tx },
        inbound: in_rx,
        task,
    })
}

async fn pump(
    ws: Ws,
    mut outbound: mpsc::UnboundedReceiver<SignalEnvelope>,
    inbound: mpsc::Sender<SignalEnvelope>,
    ping_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut ping = tokio::time::interval(ping_every.max(Duration::from_secs(1)));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    let _ = ws_tx.send(tungstenite::Message::Close(None)).await;
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = ws_tx.send(tungstenite::Message::Ping(Vec::new())).await {
                    warn!("signaling ping failed: {e}");
                    break;
                }
            }
            out = outbound.recv() => {
                let Some(env) = out else { break; };
                let json = serde_json::to_string(&env)?;
                ws_tx.send(tungstenite::Message::Text(json)).await.context("signaling send")?;
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break; };
                let text = match msg.context("signaling recv")? {
                    tungstenite::Message::Text(t) => t,
                    tungstenite::Message::Ping(p) => {
                        let _ = ws_tx.send(tungstenite::Message::Pong(p)).await;
                        continue;
                    }
                    tungstenite::Message::Close(_) => break,
                    _ => continue,
                };
                let env: SignalEnvelope = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        error!("bad signaling json: {e}");
                        continue;
                    }
                };
                if inbound.send(env).await.is_err() {
                    debug!("inbound receiver gone");
                    break;
                }
            }
        }
    }

    info!("signaling closed");
    Ok(())
}
