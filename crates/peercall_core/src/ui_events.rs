/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

fn now_ms_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEventKind {
    IdentityAssigned { id: String },
    IncomingRinging { caller: String },
    Dialing { target: String },
    Connecting { peer: String },
    Connected,
    Ended,
    LocalMedia { stream_id: String, tracks: usize },
    RemoteTrack {
        media_kind: String,
        track_id: String,
        stream_id: String,
    },
    DataChannelOpen { label: String },
    PeerMessage { text: String },
    Log { line: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct UiEvent {
    #[serde(flatten)]
    pub kind: UiEventKind,
    pub ts_ms: u64,
}

impl UiEvent {
    pub fn new(kind: UiEventKind) -> Self {
        Self {
            kind,
            ts_ms: now_ms_u64(),
        }
    }

    pub fn log(line: impl Into<String>) -> Self {
        Self::new(UiEventKind::Log { line: line.into() })
    }
}

/// Which modal the shell shows. Owned by the shell; the controller never reads it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CallUiState {
    #[default]
    Idle,
    Dialing(String),
    IncomingRinging(String),
    Connecting(String),
    Connected,
    Ended,
}

impl CallUiState {
    /// Folds one event into the projection. Returns true when the state changed.
    pub fn apply(&mut self, kind: &UiEventKind) -> bool {
        let next = match kind {
            UiEventKind::Dialing { target } => CallUiState::Dialing(target.clone()),
            UiEventKind::IncomingRinging { caller } => CallUiState::IncomingRinging(caller.clone()),
            UiEventKind::Connecting { peer } => CallUiState::Connecting(peer.clone()),
            UiEventKind::Connected => CallUiState::Connected,
            UiEventKind::Ended => CallUiState::Ended,
            _ => return false,
        };
        if *self == next {
            return false;
        }
        *self = next;
        true
    }

    pub fn is_in_call(&self) -> bool {
        matches!(
            self,
            CallUiState::Dialing(_) | CallUiState::Connecting(_) | CallUiState::Connected
        )
    }
}
