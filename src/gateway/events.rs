use serde::{Deserialize, Serialize};

/// Messages a client sends over `/ws`, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Login {
        username: String,
    },
    JoinQueue,
    CancelQueue,
    EndGame {
        #[serde(rename = "podUrl")]
        pod_url: String,
        #[serde(rename = "matchId")]
        match_id: u64,
    },
}

/// Messages pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LoginSuccess {
        username: String,
    },
    MatchCreating,
    MatchFound {
        #[serde(rename = "podUrl")]
        pod_url: String,
        #[serde(rename = "matchId")]
        match_id: u64,
    },
    MatchProvisionFailed {
        message: String,
    },
    EndGameSuccess {
        message: String,
    },
    EndGameError {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Serializing a plain tagged enum of strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Splits a text frame into client messages. Lines that fail to parse are logged
/// and skipped.
pub fn parse_frame(text: &str) -> Vec<ClientMessage> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<ClientMessage>(line) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::debug!("ignoring malformed client message {line:?}: {e}");
                None
            }
        })
        .collect()
}
