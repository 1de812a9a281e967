//! Newline-delimited JSON framing. One envelope per line, both directions:
//! `{"type": <tag>, "data": <object>, "request_id": <optional>}`.

use serde::{Deserialize, Serialize};

use crate::events::ServerEvent;

/// An inbound envelope with the payload left undecoded; the router picks the
/// handler from `ty` and the handler decodes `data` against its own schema.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// An outbound envelope. Direct replies echo the inbound `request_id`;
/// fan-out copies to other recipients carry none.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: ServerEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Envelope {
    pub fn event(event: ServerEvent) -> Self {
        Self {
            event,
            request_id: None,
        }
    }

    pub fn reply(event: ServerEvent, request_id: Option<String>) -> Self {
        Self { event, request_id }
    }

    /// Serialize to a single newline-terminated line.
    pub fn to_line(&self) -> String {
        let mut line =
            serde_json::to_string(self).expect("envelope serialization cannot fail");
        line.push('\n');
        line
    }
}

pub fn decode_line(line: &str) -> serde_json::Result<RawEnvelope> {
    serde_json::from_str(line)
}
