//! Envelope model and typed message contents.

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Messaging protocol version stamped on every outbound header.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Message header. Field names follow the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    #[serde(rename = "session")]
    pub session_id: String,
    pub username: String,
    pub msg_type: String,
    #[serde(rename = "version")]
    pub protocol_version: String,
    #[serde(rename = "date", default)]
    pub timestamp: String,
}

impl Header {
    /// Fresh header with a new `msg_id` and the current time.
    #[must_use]
    pub fn new(msg_type: &str, session_id: &str, username: &str) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            username: username.to_string(),
            msg_type: msg_type.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// Structured message unit exchanged on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Routing frames preceding the delimiter.
    pub identities: Vec<Bytes>,
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Map<String, Value>,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl Envelope {
    /// New parentless envelope carrying `content`.
    ///
    /// # Errors
    /// Returns error if the content cannot be serialized.
    pub fn new<C: MessageContent>(
        content: &C,
        session_id: &str,
        username: &str,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            identities: Vec::new(),
            header: Header::new(C::MSG_TYPE, session_id, username),
            parent_header: None,
            metadata: Map::new(),
            content: serde_json::to_value(content)?,
            buffers: Vec::new(),
        })
    }

    /// Child of `parent`: parent header copied verbatim, routed back to the
    /// same requester.
    ///
    /// # Errors
    /// Returns error if the content cannot be serialized.
    pub fn reply_to<C: MessageContent>(
        parent: &Self,
        content: &C,
        session_id: &str,
        username: &str,
    ) -> Result<Self, serde_json::Error> {
        let mut child = Self::new(content, session_id, username)?;
        child.parent_header = Some(parent.header.clone());
        child.identities.clone_from(&parent.identities);
        Ok(child)
    }

    /// Child of `parent` for the broadcast channel, topic set to the message type.
    ///
    /// # Errors
    /// Returns error if the content cannot be serialized.
    pub fn broadcast<C: MessageContent>(
        parent: &Self,
        content: &C,
        session_id: &str,
        username: &str,
    ) -> Result<Self, serde_json::Error> {
        let mut child = Self::new(content, session_id, username)?;
        child.parent_header = Some(parent.header.clone());
        child.identities = vec![Bytes::from(C::MSG_TYPE)];
        Ok(child)
    }

    #[must_use]
    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Deserialize the content as a typed message body.
    ///
    /// # Errors
    /// Returns error if the content does not match `C`.
    pub fn parse_content<C: MessageContent + DeserializeOwned>(&self) -> Result<C, serde_json::Error> {
        C::deserialize(&self.content)
    }
}

/// Typed message body bound to its `msg_type`.
pub trait MessageContent: Serialize {
    const MSG_TYPE: &'static str;
}

macro_rules! message_content {
    ($($ty:ty => $name:literal),+ $(,)?) => {
        $(impl MessageContent for $ty {
            const MSG_TYPE: &'static str = $name;
        })+
    };
}

/// Reply status carried by replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// Request handled.
    Ok,
    /// Request failed.
    Error,
    /// Request skipped.
    Abort,
}

/// Activity state broadcast on iopub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Handling a request.
    Busy,
    /// Waiting for work.
    Idle,
    /// Starting up, not yet serving.
    Starting,
}

/// Ask for protocol, implementation and language metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelInfoRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsCompleteRequest {
    /// Source to check.
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Source of the cell.
    pub code: String,
    /// Client asks for no broadcast output. Accepted, not honoured.
    #[serde(default)]
    pub silent: bool,
    /// Client asks for the cell to be recorded in history.
    #[serde(default = "default_true")]
    pub store_history: bool,
    /// Extra expressions to evaluate after the cell. Accepted, not evaluated.
    #[serde(default)]
    pub user_expressions: Map<String, Value>,
    /// Whether the kernel may prompt for input on stdin.
    #[serde(default)]
    pub allow_stdin: bool,
    /// Client asks for queued executions to be aborted after an error.
    #[serde(default)]
    pub stop_on_error: bool,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownRequest {
    /// Client intends to start a fresh kernel afterwards.
    #[serde(default)]
    pub restart: bool,
}

/// Stop the running execution at its next checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterruptRequest {}

/// Language metadata advertised in `kernel_info_reply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    /// Language name, e.g. `calc`.
    pub name: String,
    /// Language version string.
    pub version: String,
    /// MIME type of source files.
    pub mimetype: String,
    /// Extension including the leading dot.
    pub file_extension: String,
}

/// Documentation link shown by front-ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelpLink {
    /// Link label.
    pub text: String,
    /// Link target.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelInfoReply {
    /// Outcome of the request.
    pub status: ReplyStatus,
    /// Messaging protocol version this kernel speaks.
    pub protocol_version: String,
    /// Kernel implementation name.
    pub implementation: String,
    /// Kernel implementation version.
    pub implementation_version: String,
    /// Language the engine evaluates.
    pub language_info: LanguageInfo,
    /// Text shown when a front-end starts.
    pub banner: String,
    /// Documentation links.
    pub help_links: Vec<HelpLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsCompleteReply {
    /// One of `complete`, `incomplete`, `invalid` or `unknown`.
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteReply {
    /// Outcome of the request.
    pub status: ReplyStatus,
    /// Count assigned to the request this answers.
    pub execution_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteInput {
    /// Source being executed, echoed verbatim.
    pub code: String,
    /// Count of the execute request this belongs to.
    pub execution_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    /// Count of the execute request this belongs to.
    pub execution_count: u32,
    /// MIME bundle; empty when the cell produced no value.
    pub data: Map<String, Value>,
    /// Per-MIME-type metadata.
    pub metadata: Map<String, Value>,
}

/// `transient` block of display messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transient {
    /// Id later updates refer to.
    pub display_id: String,
}

/// Rich output produced during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayDataContent {
    /// MIME bundle keyed by MIME type.
    pub data: Map<String, Value>,
    /// Per-MIME-type metadata.
    pub metadata: Map<String, Value>,
    /// Display id, when the output can be updated later.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transient: Option<Transient>,
}

/// Same body as `display_data`, sent under the update message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateDisplayDataContent(pub DisplayDataContent);

/// Failed execution, broadcast in place of `execute_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContent {
    /// Error category, e.g. `NameError`.
    pub ename: String,
    /// Error message.
    pub evalue: String,
    /// Formatted trace lines, outermost first.
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// Activity state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    /// New activity state.
    pub execution_state: ExecutionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownReply {
    /// Outcome of the request.
    pub status: ReplyStatus,
    /// Echo of the request's `restart`.
    pub restart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptReply {
    /// Outcome of the request.
    pub status: ReplyStatus,
}

message_content! {
    KernelInfoRequest => "kernel_info_request",
    IsCompleteRequest => "is_complete_request",
    ExecuteRequest => "execute_request",
    ShutdownRequest => "shutdown_request",
    InterruptRequest => "interrupt_request",
    KernelInfoReply => "kernel_info_reply",
    IsCompleteReply => "is_complete_reply",
    ExecuteReply => "execute_reply",
    ExecuteInput => "execute_input",
    ExecuteResult => "execute_result",
    DisplayDataContent => "display_data",
    UpdateDisplayDataContent => "update_display_data",
    ErrorContent => "error",
    Status => "status",
    ShutdownReply => "shutdown_reply",
    InterruptReply => "interrupt_reply",
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request() -> Envelope {
        let mut env = Envelope::new(
            &ExecuteRequest {
                code: "1+1".to_string(),
                silent: false,
                store_history: true,
                user_expressions: Map::new(),
                allow_stdin: false,
                stop_on_error: true,
            },
            "client-session",
            "user",
        )
        .unwrap();
        env.identities = vec![Bytes::from_static(b"client-route")];
        env
    }

    #[test]
    fn test_header_wire_names() {
        let header = Header::new("status", "abc", "kernel");
        let value = serde_json::to_value(&header).unwrap();
        assert_eq!(value["session"], "abc");
        assert_eq!(value["version"], PROTOCOL_VERSION);
        assert!(value["date"].as_str().unwrap().ends_with('Z'));
        assert_ne!(header.msg_id, Header::new("status", "abc", "kernel").msg_id);
    }

    #[test]
    fn test_reply_copies_parent_and_route() {
        let parent = request();
        let reply = Envelope::reply_to(
            &parent,
            &ExecuteReply {
                status: ReplyStatus::Ok,
                execution_count: 1,
            },
            "kernel-session",
            "kernel",
        )
        .unwrap();
        assert_eq!(reply.parent_header.as_ref(), Some(&parent.header));
        assert_eq!(reply.identities, parent.identities);
        assert_eq!(reply.msg_type(), "execute_reply");
        assert_eq!(reply.content, json!({"status": "ok", "execution_count": 1}));
    }

    #[test]
    fn test_broadcast_topic_is_msg_type() {
        let parent = request();
        let status = Envelope::broadcast(
            &parent,
            &Status {
                execution_state: ExecutionState::Busy,
            },
            "kernel-session",
            "kernel",
        )
        .unwrap();
        assert_eq!(status.identities, vec![Bytes::from_static(b"status")]);
        assert_eq!(status.content["execution_state"], "busy");
    }

    #[test]
    fn test_execute_request_defaults() {
        let mut env = request();
        env.content = json!({"code": "x"});
        let parsed: ExecuteRequest = env.parse_content().unwrap();
        assert_eq!(parsed.code, "x");
        assert!(parsed.store_history);
        assert!(!parsed.silent);
    }

    #[test]
    fn test_display_transient_omitted_when_absent() {
        let content = DisplayDataContent {
            data: Map::new(),
            metadata: Map::new(),
            transient: None,
        };
        let value = serde_json::to_value(UpdateDisplayDataContent(content)).unwrap();
        assert!(value.get("transient").is_none());
    }
}
