//! Wire protocol spoken between the server and a hook process: one
//! length-prefixed JSON request, one length-prefixed JSON response.
//! Unknown fields are ignored on decode so either side may grow the
//! schema within a release line.

use std::{fmt, str::FromStr};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Frame cap shared by both directions of the channel.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookType {
    PreReceive,
    PostReceive,
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreReceive => write!(f, "pre-receive"),
            Self::PostReceive => write!(f, "post-receive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown hook type: {0}")]
pub struct ParseHookTypeError(String);

impl FromStr for HookType {
    type Err = ParseHookTypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pre-receive" => Ok(Self::PreReceive),
            "post-receive" => Ok(Self::PostReceive),
            other => Err(ParseHookTypeError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Note,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookMessage {
    pub severity: Severity,
    pub text: String,
}

impl HookMessage {
    pub fn note(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Note,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRequest {
    pub secret: String,
    pub hook_type: HookType,
    pub transaction_id: String,
    pub repository_id: String,
    pub challenge: String,
    pub node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
    pub abort: bool,
    pub messages: Vec<HookMessage>,
}

impl HookResponse {
    /// The operation may proceed; carries whatever the listeners said.
    pub fn accepted(messages: Vec<HookMessage>) -> Self {
        Self {
            abort: false,
            messages,
        }
    }

    /// The operation must be rejected. Listener messages keep their
    /// order and exactly one terminal ERROR is appended after them.
    pub fn aborted(mut messages: Vec<HookMessage>, terminal: impl Into<String>) -> Self {
        messages.push(HookMessage::error(terminal));
        Self {
            abort: true,
            messages,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("hook channel i/o failed")]
    Io(#[from] std::io::Error),
    #[error("malformed hook frame")]
    Decode(#[from] serde_json::Error),
    #[error("hook channel closed before a full frame arrived")]
    ConnectionClosed,
}

pub fn codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

pub async fn send<S, T>(
    framed: &mut Framed<S, LengthDelimitedCodec>,
    value: &T,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    framed.send(Bytes::from(payload)).await?;
    Ok(())
}

pub async fn receive<S, T>(framed: &mut Framed<S, LengthDelimitedCodec>) -> Result<T, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: DeserializeOwned,
{
    let Some(frame) = framed.next().await else {
        return Err(ProtocolError::ConnectionClosed);
    };
    let frame = frame?;
    Ok(serde_json::from_slice(&frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HookRequest {
        HookRequest {
            secret: "s3cr3t".to_string(),
            hook_type: HookType::PostReceive,
            transaction_id: "ti21".to_string(),
            repository_id: "42".to_string(),
            challenge: "ch4ll3ng3".to_string(),
            node: Some("abc".to_string()),
        }
    }

    #[tokio::test]
    async fn request_round_trips_over_a_framed_stream() {
        let (client, server) = tokio::io::duplex(4096);
        let mut sending = Framed::new(client, codec(DEFAULT_MAX_FRAME_BYTES));
        let mut receiving = Framed::new(server, codec(DEFAULT_MAX_FRAME_BYTES));

        send(&mut sending, &request()).await.unwrap();
        let decoded: HookRequest = receive(&mut receiving).await.unwrap();

        assert_eq!(decoded.repository_id, "42");
        assert_eq!(decoded.hook_type, HookType::PostReceive);
        assert_eq!(decoded.node.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_on_receive() {
        let (client, server) = tokio::io::duplex(4096);
        let mut sending = Framed::new(client, codec(DEFAULT_MAX_FRAME_BYTES));
        let mut receiving = Framed::new(server, codec(64));

        send(&mut sending, &request()).await.unwrap();
        let decoded: Result<HookRequest, _> = receive(&mut receiving).await;

        assert!(matches!(decoded, Err(ProtocolError::Io(_))));
    }

    #[test]
    fn unknown_fields_are_ignored_and_node_is_optional() {
        let raw = r#"{
            "secret": "s",
            "hook_type": "PRE_RECEIVE",
            "transaction_id": "t",
            "repository_id": "r",
            "challenge": "c",
            "flux_capacitor": true
        }"#;
        let decoded: HookRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(decoded.hook_type, HookType::PreReceive);
        assert!(decoded.node.is_none());
    }

    #[test]
    fn wire_names_are_stable() {
        assert_eq!(
            serde_json::to_string(&HookType::PreReceive).unwrap(),
            "\"PRE_RECEIVE\""
        );
        assert_eq!(
            serde_json::to_string(&HookType::PostReceive).unwrap(),
            "\"POST_RECEIVE\""
        );
        assert_eq!(serde_json::to_string(&Severity::Note).unwrap(), "\"NOTE\"");
        assert_eq!(serde_json::to_string(&Severity::Error).unwrap(), "\"ERROR\"");
    }

    #[test]
    fn hook_types_parse_from_cli_names() {
        assert_eq!("pre-receive".parse::<HookType>(), Ok(HookType::PreReceive));
        assert_eq!("post-receive".parse::<HookType>(), Ok(HookType::PostReceive));
        assert!("update".parse::<HookType>().is_err());
    }

    #[test]
    fn aborting_appends_exactly_one_terminal_error() {
        let response = HookResponse::aborted(vec![HookMessage::note("Some note")], "unknown error");
        assert!(response.abort);
        assert_eq!(
            response.messages,
            vec![HookMessage::note("Some note"), HookMessage::error("unknown error")]
        );
    }
}
