use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

pub const INCOMING_TYPES: &[&str] = &[
    "state",
    "window_focus",
    "session_workspace",
    "window_closed",
    "click",
    "focus_next",
    "clear_agents",
    "mark_all_started",
    "auto_focus",
    "return_workspace",
    "auto_focus_config",
    "idle_status",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Started,
    Working,
    Awaiting,
    Processing,
    Completed,
    Ended,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Started => "started",
            AgentState::Working => "working",
            AgentState::Awaiting => "awaiting",
            AgentState::Processing => "processing",
            AgentState::Completed => "completed",
            AgentState::Ended => "ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Ended)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of coding agent behind a session. Unknown names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AgentType {
    #[default]
    Claude,
    Cursor,
    Other(String),
}

impl AgentType {
    pub fn as_str(&self) -> &str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Cursor => "cursor",
            AgentType::Other(name) => name.as_str(),
        }
    }
}

impl From<&str> for AgentType {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("claude") {
            AgentType::Claude
        } else if trimmed.eq_ignore_ascii_case("cursor") {
            AgentType::Cursor
        } else {
            AgentType::Other(value.to_string())
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AgentType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AgentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AgentTypeVisitor;

        impl<'de> Visitor<'de> for AgentTypeVisitor {
            type Value = AgentType;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an agent type name")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(AgentType::from(value))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(AgentType::default())
            }
        }

        deserializer.deserialize_any(AgentTypeVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    State {
        session: String,
        state: AgentState,
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        agent_type: AgentType,
    },
    WindowFocus {
        #[serde(default)]
        title: String,
        // accepted so older trackers still decode; focus resolves from the title alone
        #[serde(default)]
        agent_type: Option<String>,
    },
    SessionWorkspace {
        session: String,
        workspace: u32,
        #[serde(default)]
        monitor: u32,
    },
    WindowClosed {
        session: String,
    },
    Click {
        session: String,
    },
    FocusNext,
    ClearAgents,
    MarkAllStarted,
    AutoFocus {
        session: String,
    },
    ReturnWorkspace,
    AutoFocusConfig {
        enabled: bool,
        focus_delay_ms: u64,
    },
    IdleStatus {
        idle: bool,
    },
}

impl IncomingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingMessage::State { .. } => "state",
            IncomingMessage::WindowFocus { .. } => "window_focus",
            IncomingMessage::SessionWorkspace { .. } => "session_workspace",
            IncomingMessage::WindowClosed { .. } => "window_closed",
            IncomingMessage::Click { .. } => "click",
            IncomingMessage::FocusNext => "focus_next",
            IncomingMessage::ClearAgents => "clear_agents",
            IncomingMessage::MarkAllStarted => "mark_all_started",
            IncomingMessage::AutoFocus { .. } => "auto_focus",
            IncomingMessage::ReturnWorkspace => "return_workspace",
            IncomingMessage::AutoFocusConfig { .. } => "auto_focus_config",
            IncomingMessage::IdleStatus { .. } => "idle_status",
        }
    }

    /// Messages only a UI client sends; a connection sending one starts
    /// receiving broadcasts.
    pub fn is_ui_command(&self) -> bool {
        !matches!(
            self,
            IncomingMessage::State { .. }
                | IncomingMessage::SessionWorkspace { .. }
                | IncomingMessage::WindowClosed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInfo {
    pub session: String,
    pub group: String,
    pub group_index: u32,
    pub state: AgentState,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub focused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Render {
        agents: Vec<AgentInfo>,
    },
    Focus {
        session: String,
        agent_type: AgentType,
    },
    SwitchWorkspace {
        workspace: u32,
    },
    AutoFocusConfig {
        enabled: bool,
        focus_delay_ms: u64,
    },
    IdleStatus {
        idle: bool,
    },
}

impl OutgoingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutgoingMessage::Render { .. } => "render",
            OutgoingMessage::Focus { .. } => "focus",
            OutgoingMessage::SwitchWorkspace { .. } => "switch_workspace",
            OutgoingMessage::AutoFocusConfig { .. } => "auto_focus_config",
            OutgoingMessage::IdleStatus { .. } => "idle_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub frames: Vec<IncomingMessage>,
    pub errors: Vec<FrameError>,
}

impl Default for DecodeReport {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl DecodeReport {
    fn push(&mut self, decoded: Result<IncomingMessage, FrameError>) {
        match decoded {
            Ok(frame) => self.frames.push(frame),
            Err(err) => self.errors.push(err),
        }
    }
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let raw = strip_line_ending(bytes);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Decodes one inbound line, telling a well-formed frame of an unknown
/// `type` apart from malformed JSON.
pub fn decode_message(bytes: &[u8], max_frame_bytes: usize) -> Result<IncomingMessage, FrameError> {
    let value: Value = decode_frame(bytes, max_frame_bytes)?;
    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => return Err(FrameError::Decode(format!("type must be a string, got {other}"))),
        None => return Err(FrameError::Decode("missing type field".to_string())),
    };
    if !INCOMING_TYPES.contains(&kind.as_str()) {
        return Err(FrameError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|err| FrameError::Decode(format!("{kind}: {err}")))
}

fn strip_line_ending(bytes: &[u8]) -> &[u8] {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    raw
}

pub struct FrameDecoder {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    discarding: bool,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            discarding: false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport {
        let mut report = DecodeReport::default();
        let mut rest = chunk;

        while let Some(newline_idx) = rest.iter().position(|byte| *byte == b'\n') {
            let (line, tail) = rest.split_at(newline_idx + 1);
            rest = tail;
            if self.discarding {
                // tail end of a line already reported as oversized
                self.discarding = false;
                continue;
            }
            self.pending.extend_from_slice(line);
            let frame = std::mem::take(&mut self.pending);
            self.decode_line(&frame, &mut report);
        }

        if !rest.is_empty() && !self.discarding {
            self.pending.extend_from_slice(rest);
            if self.pending.len() > self.max_frame_bytes {
                report.errors.push(FrameError::OversizedBuffer {
                    size: self.pending.len(),
                    max: self.max_frame_bytes,
                });
                self.pending.clear();
                self.discarding = true;
            }
        }

        report
    }

    pub fn finish(&mut self) -> DecodeReport {
        let mut report = DecodeReport::default();
        if self.discarding {
            self.discarding = false;
            self.pending.clear();
            return report;
        }
        if self.pending.is_empty() {
            return report;
        }

        let final_frame = std::mem::take(&mut self.pending);
        self.decode_line(&final_frame, &mut report);
        report
    }

    fn decode_line(&self, line: &[u8], report: &mut DecodeReport) {
        let raw = strip_line_ending(line);
        if raw.iter().all(|byte| byte.is_ascii_whitespace()) {
            return;
        }
        report.push(decode_message(raw, self.max_frame_bytes));
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}
