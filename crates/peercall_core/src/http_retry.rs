/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rand::{thread_rng, Rng};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.clamp(1, 5),
            base: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Sends the request, retrying transport errors and 429/5xx answers with jittered
/// exponential backoff. The last response is returned as-is, even when unsuccessful.
pub async fn send_with_retry<F>(mut build: F, policy: RetryPolicy) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let mut backoff = policy.base;
    let mut attempt = 1;
    loop {
        let last = attempt >= policy.attempts;
        match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if last || !should_retry_status(status) {
                    return Ok(resp);
                }
                debug!(%status, attempt, "retrying request");
            }
            Err(e) => {
                if last {
                    return Err(e.into());
                }
                debug!(attempt, "retrying request after error: {e}");
            }
        }
        sleep_with_jitter(backoff).await;
        backoff = backoff.saturating_mul(2).min(policy.max);
        attempt += 1;
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms: u64 = thread_rng().gen_range(0..=200);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_only_throttling_and_server_errors() {
        assert!(should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(!should_retry_status(StatusCode::NOT_FOUND));
        assert!(!should_retry_status(StatusCode::OK));
    }

    #[test]
    fn attempts_are_clamped() {
        assert_eq!(RetryPolicy::new(0).attempts(), 1);
        assert_eq!(RetryPolicy::new(3).attempts(), 3);
        assert_eq!(RetryPolicy::new(50).attempts(), 5);
    }
}
