//! Opcodes and request/response envelopes.

use serde::{Deserialize, Serialize};

/// Protocol version, negotiated through the `Health` opcode. Tracks the
/// crate version; the compatibility rule is an exact major.minor match.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Operations the dispatcher routes. ASCII names on the wire; semantics are
/// extended additively only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Health,
    Status,
    List,
    Show,
    Ready,
    Blocked,
    Stats,
    Create,
    Update,
    Close,
    Delete,
    AddDependency,
    RemoveDependency,
    Comment,
    Import,
    Export,
    VcsStatus,
    Mutations,
    Swarm,
    Shutdown,
}

impl Opcode {
    /// The wire name of this opcode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Health => "Health",
            Self::Status => "Status",
            Self::List => "List",
            Self::Show => "Show",
            Self::Ready => "Ready",
            Self::Blocked => "Blocked",
            Self::Stats => "Stats",
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Close => "Close",
            Self::Delete => "Delete",
            Self::AddDependency => "AddDependency",
            Self::RemoveDependency => "RemoveDependency",
            Self::Comment => "Comment",
            Self::Import => "Import",
            Self::Export => "Export",
            Self::VcsStatus => "VcsStatus",
            Self::Mutations => "Mutations",
            Self::Swarm => "Swarm",
            Self::Shutdown => "Shutdown",
        }
    }

    /// Returns `true` for opcodes that mutate the workspace.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Create
                | Self::Update
                | Self::Close
                | Self::Delete
                | Self::AddDependency
                | Self::RemoveDependency
                | Self::Comment
                | Self::Import
                | Self::Export
        )
    }
}

/// A request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The operation to perform.
    pub op: Opcode,
    /// Opaque operation payload; the dispatcher hands it to the handler
    /// without inspection.
    #[serde(default)]
    pub args: serde_json::Value,
    /// Caller-chosen correlation ID, echoed in the response.
    pub request_id: u64,
    /// Per-request deadline in milliseconds; the server default applies when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    /// Operation result payload on success.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Human-readable error message on failure.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Stable error kind on failure (the contract; the message is not).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_kind: String,
    /// Echo of the request's correlation ID.
    pub request_id: u64,
}

impl Response {
    /// A successful response carrying `data`.
    pub fn ok(request_id: u64, data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: String::new(),
            error_kind: String::new(),
            request_id,
        }
    }

    /// A failed response with a stable kind and message.
    pub fn err(request_id: u64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: message.into(),
            error_kind: kind.into(),
            request_id,
        }
    }
}

/// Server health, as reported by the `Health` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Payload of a `Health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub version: String,
    /// Whether the reporting server believes the caller's version is
    /// compatible.
    pub compatible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Compatibility rule: exact major.minor match.
pub fn is_compatible(ours: &str, theirs: &str) -> bool {
    fn major_minor(v: &str) -> Option<(&str, &str)> {
        let mut parts = v.split('.');
        Some((parts.next()?, parts.next()?))
    }
    match (major_minor(ours), major_minor(theirs)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_wire_names() {
        assert_eq!(
            serde_json::to_string(&Opcode::AddDependency).unwrap(),
            "\"AddDependency\""
        );
        let op: Opcode = serde_json::from_str("\"Health\"").unwrap();
        assert_eq!(op, Opcode::Health);
        assert_eq!(op.as_str(), "Health");
    }

    #[test]
    fn write_classification() {
        assert!(Opcode::Create.is_write());
        assert!(Opcode::Import.is_write());
        assert!(!Opcode::Health.is_write());
        assert!(!Opcode::Ready.is_write());
        assert!(!Opcode::Mutations.is_write());
    }

    #[test]
    fn request_roundtrip_with_payload() {
        let req = Request {
            op: Opcode::Show,
            args: serde_json::json!({"id": "t-1"}),
            request_id: 42,
            timeout_ms: Some(1_000),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back.op, Opcode::Show);
        assert_eq!(back.args["id"], "t-1");
        assert_eq!(back.request_id, 42);
    }

    #[test]
    fn response_constructors() {
        let ok = Response::ok(7, serde_json::json!({"fine": true}));
        assert!(ok.success);
        assert_eq!(ok.request_id, 7);

        let err = Response::err(8, "not_found", "issue t-9 not found");
        assert!(!err.success);
        assert_eq!(err.error_kind, "not_found");
        assert_eq!(err.request_id, 8);
    }

    #[test]
    fn version_compatibility() {
        assert!(is_compatible("0.1.0", "0.1.3"));
        assert!(!is_compatible("0.1.0", "0.2.0"));
        assert!(!is_compatible("1.1.0", "0.1.0"));
        assert!(!is_compatible("garbage", "0.1.0"));
        assert!(is_compatible(PROTOCOL_VERSION, PROTOCOL_VERSION));
    }

    #[test]
    fn unknown_opcode_fails_to_parse() {
        assert!(serde_json::from_str::<Opcode>("\"Teleport\"").is_err());
    }
}
