/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

/// One message on the signaling socket. The relay fills `from`; clients only set `to`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SignalEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalPayload>,
}

/// Discriminated by field presence: `type`+`sdp` is a description, `candidate` is a candidate.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SignalPayload {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// An empty candidate line marks end-of-candidates and must never be applied.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// What an inbound envelope means for the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Identity(String),
    Signal {
        from: Option<String>,
        payload: SignalPayload,
    },
    Ignored,
}

impl SignalEnvelope {
    pub fn to_peer(to: &str, payload: SignalPayload) -> Self {
        Self {
            from: None,
            to: Some(to.to_string()),
            signal: Some(payload),
        }
    }

    pub fn into_inbound(self) -> Inbound {
        let from = self
            .from
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let to_empty = self.to.as_deref().map(str::trim).unwrap_or("").is_empty();
        match (from, self.signal) {
            (Some(id), None) if to_empty => Inbound::Identity(id),
            (from, Some(payload)) => Inbound::Signal { from, payload },
            _ => Inbound::Ignored,
        }
    }
}

/// Response body of the ICE configuration endpoint. Extra fields (e.g. `ttl`) are ignored.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RtcConfig {
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

impl RtcConfig {
    pub fn fallback(stun_url: &str) -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: IceUrls::One(stun_url.to_string()),
                username: None,
                credential: None,
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            IceUrls::One(u) => vec![u.clone()],
            IceUrls::Many(v) => v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Inbound {
        serde_json::from_str::<SignalEnvelope>(text)
            .expect("envelope json")
            .into_inbound()
    }

    #[test]
    fn identity_announcement_has_from_only() {
        assert_eq!(parse(r#"{"from":"abc"}"#), Inbound::Identity("abc".into()));
        assert_eq!(
            parse(r#"{"from":"abc","to":"","signal":null}"#),
            Inbound::Identity("abc".into())
        );
        assert_eq!(parse(r#"{"from":"abc","to":"me"}"#), Inbound::Ignored);
        assert_eq!(parse(r#"{}"#), Inbound::Ignored);
    }

    #[test]
    fn payload_kind_follows_field_presence() {
        let Inbound::Signal { from, payload } =
            parse(r#"{"from":"a","to":"b","signal":{"type":"offer","sdp":"v=0"}}"#)
        else {
            panic!("expected signal");
        };
        assert_eq!(from.as_deref(), Some("a"));
        assert_eq!(payload, SignalPayload::Description(SessionDescription::offer("v=0")));

        let raw = serde_json::json!({
            "from": "a",
            "signal": {
                "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }
        });
        let Inbound::Signal { payload, .. } = parse(&raw.to_string()) else {
            panic!("expected signal");
        };
        let SignalPayload::Candidate(c) = payload else {
            panic!("expected candidate");
        };
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(0));
        assert!(!c.is_end_of_candidates());
    }

    #[test]
    fn end_of_candidates_marker() {
        let Inbound::Signal { payload, .. } =
            parse(r#"{"from":"a","signal":{"candidate":"","sdpMid":null,"sdpMLineIndex":null}}"#)
        else {
            panic!("expected signal");
        };
        let SignalPayload::Candidate(c) = payload else {
            panic!("expected candidate");
        };
        assert!(c.is_end_of_candidates());
    }

    #[test]
    fn outbound_envelope_shape() {
        let answer = SignalPayload::Description(SessionDescription::answer("x"));
        let env = SignalEnvelope::to_peer("B", answer);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v, serde_json::json!({"to":"B","signal":{"type":"answer","sdp":"x"}}));
    }

    #[test]
    fn ice_servers_accept_string_or_list() {
        let cfg: RtcConfig = serde_json::from_value(serde_json::json!({
            "iceServers": [
                {"urls": "stun:a"},
                {"urls": ["turn:b", "turns:c"], "username": "u", "credential": "p"}
            ],
            "ttl": 3600
        }))
        .unwrap();
        assert_eq!(cfg.ice_servers.len(), 2);
        assert_eq!(cfg.ice_servers[0].urls.to_vec(), vec!["stun:a".to_string()]);
        assert_eq!(cfg.ice_servers[1].urls.to_vec().len(), 2);
        assert_eq!(cfg.ice_servers[1].username.as_deref(), Some("u"));
    }
}
