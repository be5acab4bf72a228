/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use peercall_core::config::CallConfig;
use peercall_core::runtime::{self, init_tracing, UserCommand, USAGE};
use peercall_core::ui_events::{CallUiState, UiEvent, UiEventKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

fn render(state: &mut CallUiState, ev: &UiEvent) {
    match &ev.kind {
        UiEventKind::IdentityAssigned { id } => println!("your id: {id}"),
        UiEventKind::LocalMedia { stream_id, tracks } => {
            println!("local stream {stream_id} ({tracks} tracks)")
        }
        UiEventKind::RemoteTrack {
            media_kind,
            track_id,
            ..
        } => println!("remote {media_kind} track {track_id}"),
        UiEventKind::DataChannelOpen { label } => println!("[{label}] open"),
        UiEventKind::PeerMessage { text } => println!("peer> {text}"),
        UiEventKind::Log { line } => println!("* {line}"),
        _ => {}
    }
    if state.apply(&ev.kind) {
        match state {
            CallUiState::IncomingRinging(caller) => {
                println!("incoming call from {caller} (answer / reject)")
            }
            CallUiState::Dialing(target) => println!("calling {target}... (hangup to cancel)"),
            CallUiState::Connecting(peer) => println!("connecting to {peer}..."),
            CallUiState::Connected => println!("connected"),
            CallUiState::Ended => println!("call ended"),
            CallUiState::Idle => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = CallConfig::load()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let client = runtime::connect(&cfg, shutdown_rx.clone()).await?;

    let mut ui = client.subscribe_ui();
    tokio::spawn(async move {
        let mut state = CallUiState::default();
        loop {
            match ui.recv().await {
                Ok(ev) => render(&mut state, &ev),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "ui events lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        println!("{USAGE}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match UserCommand::parse(&line) {
                Ok(Some(cmd)) => {
                    if cmd_tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{e}"),
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    client.run(cmd_rx, shutdown_rx).await
}
