//! Signaling message schema
//!
//! Every frame on the signaling channel is one JSON envelope:
//! `{"data": string, "type": integer}`. The `data` field carries a nested
//! JSON document whose shape depends on the message type:
//!
//! | type | name                 | data                          |
//! |------|----------------------|-------------------------------|
//! | 0    | `ICE_CANDIDATE`      | [`IceCandidateInit`]          |
//! | 1    | `OFFER`              | [`SessionDescription`]        |
//! | 2    | `ANSWER`             | [`SessionDescription`]        |
//! | 3    | `NEGOTIATION_NEEDED` | unused                        |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Signaling message type, encoded on the wire as an integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    IceCandidate,
    Offer,
    Answer,
    NegotiationNeeded,
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::IceCandidate),
            1 => Ok(Self::Offer),
            2 => Ok(Self::Answer),
            3 => Ok(Self::NegotiationNeeded),
            other => Err(format!("unknown signaling message type {other}")),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::IceCandidate => 0,
            MessageType::Offer => 1,
            MessageType::Answer => 2,
            MessageType::NegotiationNeeded => 3,
        }
    }
}

/// One signaling envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(default)]
    pub data: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
}

impl SignalingMessage {
    /// Build a message whose `data` is the JSON encoding of `payload`.
    pub fn with_payload<T: Serialize>(kind: MessageType, payload: &T) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_string(payload)?,
            kind,
        })
    }

    #[must_use]
    pub const fn negotiation_needed() -> Self {
        Self {
            data: String::new(),
            kind: MessageType::NegotiationNeeded,
        }
    }

    /// Decode the nested payload carried in `data`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data).map_err(|e| {
            Error::InvalidMessage(format!("malformed {:?} payload: {e}", self.kind))
        })
    }

    /// Parse one envelope from a text frame.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::InvalidMessage(format!("malformed envelope: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description (SDP) in the browser's `RTCSessionDescriptionInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

/// Outbound half of one peer's signaling channel.
///
/// Every clone feeds the same queue, drained by a single writer task, so
/// offers, answers and candidates for one peer are never interleaved.
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::Sender<SignalingMessage>,
}

impl SignalingSender {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<SignalingMessage>) -> Self {
        Self { tx }
    }

    /// Create a sender plus the receiving end for the writer task.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SignalingMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, message: SignalingMessage) -> Result<()> {
        self.tx.send(message).await.map_err(|_| Error::ChannelClosed)
    }

    pub async fn send_description(
        &self,
        kind: MessageType,
        description: &SessionDescription,
    ) -> Result<()> {
        self.send(SignalingMessage::with_payload(kind, description)?)
            .await
    }

    pub async fn send_candidate(&self, candidate: &IceCandidateInit) -> Result<()> {
        self.send(SignalingMessage::with_payload(
            MessageType::IceCandidate,
            candidate,
        )?)
        .await
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_is_encoded_as_integer() {
        let message = SignalingMessage::with_payload(
            MessageType::Answer,
            &SessionDescription::answer("v=0"),
        )
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], 2);
        assert_eq!(value["data"], r#"{"type":"answer","sdp":"v=0"}"#);
    }

    #[test]
    fn test_decode_browser_offer() {
        let raw = r#"{"type":1,"data":"{\"type\":\"offer\",\"sdp\":\"v=0\\r\\n\"}"}"#;
        let message = SignalingMessage::from_json(raw).unwrap();

        assert_eq!(message.kind, MessageType::Offer);
        let offer: SessionDescription = message.payload().unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert_eq!(offer.sdp, "v=0\r\n");
    }

    #[test]
    fn test_decode_browser_candidate() {
        let data = r#"{"candidate":"candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}"#;
        let message = SignalingMessage {
            data: data.to_string(),
            kind: MessageType::IceCandidate,
        };

        let candidate: IceCandidateInit = message.payload().unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
    }

    #[test]
    fn test_negotiation_needed_without_data() {
        let message = SignalingMessage::from_json(r#"{"type":3}"#).unwrap();
        assert_eq!(message, SignalingMessage::negotiation_needed());
    }

    #[test]
    fn test_rejects_unknown_type_and_garbage() {
        assert!(matches!(
            SignalingMessage::from_json(r#"{"type":7,"data":""}"#),
            Err(Error::InvalidMessage(_))
        ));
        assert!(SignalingMessage::from_json("not json").is_err());

        let message = SignalingMessage {
            data: "{".to_string(),
            kind: MessageType::IceCandidate,
        };
        assert!(message.payload::<IceCandidateInit>().is_err());
    }

    #[tokio::test]
    async fn test_sender_reports_closed_channel() {
        let (sender, rx) = SignalingSender::channel(1);
        drop(rx);

        assert!(sender.is_closed());
        assert!(matches!(
            sender.send(SignalingMessage::negotiation_needed()).await,
            Err(Error::ChannelClosed)
        ));
    }
}
