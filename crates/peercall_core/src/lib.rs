/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod candidate_queue;
pub mod config;
pub mod http_retry;
pub mod ice_config;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod runtime;
pub mod signaling;
pub mod ui_events;
pub mod webrtc_peer;
