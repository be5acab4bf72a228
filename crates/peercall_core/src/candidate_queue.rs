/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use peercall_protocol::IceCandidate;
use tracing::{debug, warn};

use crate::peer::PeerConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateApply {
    Applied,
    Skipped,
    Failed,
}

/// Applies one remote candidate. End-of-candidates markers are skipped, failures only logged.
pub async fn apply_candidate(conn: &dyn PeerConnection, candidate: IceCandidate) -> CandidateApply {
    if candidate.is_end_of_candidates() {
        debug!("end-of-candidates marker skipped");
        return CandidateApply::Skipped;
    }
    let line = candidate.candidate.clone();
    match conn.add_ice_candidate(candidate).await {
        Ok(()) => {
            debug!(candidate = %line, "applied remote candidate");
            CandidateApply::Applied
        }
        Err(e) => {
            warn!(candidate = %line, "add ice candidate failed: {e:#}");
            CandidateApply::Failed
        }
    }
}

/// Remote candidates that arrived before the remote description.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: Vec<IceCandidate>,
}

impl CandidateQueue {
    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops everything buffered. Returns how many candidates were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// Replays the buffer in arrival order and leaves it empty, whatever the outcome of
    /// each individual candidate. Returns the number actually applied.
    pub async fn drain_and_apply(&mut self, conn: &dyn PeerConnection) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let total = pending.len();
        let mut applied = 0;
        for candidate in pending {
            if apply_candidate(conn, candidate).await == CandidateApply::Applied {
                applied += 1;
            }
        }
        if total > 0 {
            debug!(total, applied, "flushed queued candidates");
        }
        applied
    }
}
