//! Wire protocol: newline-delimited JSON envelopes
//!
//! Every message in either direction is `{"command", "args", "kwargs"}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Command or reply name
    pub command: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<JsonValue>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Map<String, JsonValue>,
}

impl Envelope {
    /// Envelope without arguments
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Replace the positional arguments
    pub fn with_args(mut self, args: Vec<JsonValue>) -> Self {
        self.args = args;
        self
    }

    /// Add one keyword argument
    pub fn with_kwarg(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }

    /// `ERROR` reply
    pub fn error(code: ErrorCode, argument: Option<String>, message: impl Into<String>) -> Self {
        Self::new(reply::ERROR)
            .with_kwarg("code", code.as_str())
            .with_kwarg("argument", argument.map_or(JsonValue::Null, JsonValue::from))
            .with_kwarg("error", message.into())
    }

    /// Serialized line, newline included
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Reply command names
pub mod reply {
    /// Initial fixture descriptor
    pub const LIGHTS: &str = "LIGHTS";
    /// Command succeeded
    pub const OK: &str = "OK";
    /// State report
    pub const STATE: &str = "STATE";
    /// Command failed
    pub const ERROR: &str = "ERROR";
    /// Monitor broadcast
    pub const MONITOR: &str = "MONITOR";
    /// Server shutting down
    pub const QUIT: &str = "QUIT";
    /// Reply to `echo`
    pub const ECHO: &str = "echo_response";
}

/// Coarse error code carried by `ERROR` replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    /// The message has no command
    NoCommand,
    /// The command is not known
    BadCommand,
    /// An argument is missing or malformed
    BadArg,
    /// The command failed
    General,
}

impl ErrorCode {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NoCommand => "nocommand",
            ErrorCode::BadCommand => "badcommand",
            ErrorCode::BadArg => "badarg",
            ErrorCode::General => "general",
        }
    }
}

/// Commands accepted from clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reflect args and kwargs back
    Echo,
    /// Keep automation out of fixture state
    Suspend,
    /// Let automation flow into fixture state again
    Unsuspend,
    /// Report fixture state
    State,
    /// Reset fixtures to zero plus initial values
    Blackout,
    /// Write property values
    Set,
    /// Install effects
    Effect,
    /// Subscribe to monitor events
    Monitor,
}

impl Command {
    /// Case-insensitive lookup
    pub fn parse(name: &str) -> Option<Self> {
        let command = match name.to_ascii_lowercase().as_str() {
            "echo" => Command::Echo,
            "suspend" => Command::Suspend,
            "unsuspend" => Command::Unsuspend,
            "state" => Command::State,
            "blackout" => Command::Blackout,
            "set" => Command::Set,
            "effect" => Command::Effect,
            "monitor" => Command::Monitor,
            _ => return None,
        };
        Some(command)
    }
}

/// A decoded client line
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// A known command
    Command {
        /// Which command
        command: Command,
        /// Positional arguments
        args: Vec<JsonValue>,
        /// Keyword arguments
        kwargs: Map<String, JsonValue>,
    },
    /// Needs an error reply instead of dispatch
    Reject {
        /// Error code
        code: ErrorCode,
        /// Offending argument
        argument: Option<String>,
        /// Description
        message: String,
    },
}

/// Decode one line.
///
/// Returns `None` for lines that are not a JSON object; those are dropped
/// without a reply.
pub fn decode(line: &str) -> Option<Request> {
    let value: JsonValue = serde_json::from_str(line).ok()?;
    let JsonValue::Object(mut object) = value else {
        return None;
    };

    let name = match object.remove("command") {
        Some(JsonValue::String(name)) => name,
        _ => {
            return Some(Request::Reject {
                code: ErrorCode::NoCommand,
                argument: None,
                message: "No command was specified".into(),
            })
        }
    };
    let Some(command) = Command::parse(&name) else {
        return Some(Request::Reject {
            code: ErrorCode::BadCommand,
            argument: Some(name),
            message: "Invalid command".into(),
        });
    };

    let args = match object.remove("args") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(args)) => args,
        Some(_) => return Some(bad_arg("args", "args must be a list")),
    };
    let kwargs = match object.remove("kwargs") {
        None | Some(JsonValue::Null) => Map::new(),
        Some(JsonValue::Object(kwargs)) => kwargs,
        Some(_) => return Some(bad_arg("kwargs", "kwargs must be an object")),
    };

    Some(Request::Command {
        command,
        args,
        kwargs,
    })
}

fn bad_arg(argument: &str, message: &str) -> Request {
    Request::Reject {
        code: ErrorCode::BadArg,
        argument: Some(argument.to_string()),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_names_are_case_insensitive() {
        assert_eq!(Command::parse("STATE"), Some(Command::State));
        assert_eq!(Command::parse("Effect"), Some(Command::Effect));
        assert_eq!(Command::parse("dance"), None);
    }

    #[test]
    fn test_decode_missing_command() {
        let request = decode(r#"{"args": []}"#).unwrap();
        assert!(matches!(
            request,
            Request::Reject {
                code: ErrorCode::NoCommand,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_unknown_command() {
        let request = decode(r#"{"command": "dance"}"#).unwrap();
        assert_eq!(
            request,
            Request::Reject {
                code: ErrorCode::BadCommand,
                argument: Some("dance".into()),
                message: "Invalid command".into(),
            }
        );
    }

    #[test]
    fn test_decode_defaults_missing_args() {
        let request = decode(r#"{"command": "state"}"#).unwrap();
        assert_eq!(
            request,
            Request::Command {
                command: Command::State,
                args: vec![],
                kwargs: Map::new(),
            }
        );
    }

    #[test]
    fn test_decode_drops_garbage() {
        assert!(decode("{not json").is_none());
        assert!(decode("[1, 2]").is_none());
    }

    #[test]
    fn test_error_envelope_shape() {
        let envelope = Envelope::error(ErrorCode::BadArg, Some("dim".into()), "bad value");
        let encoded: JsonValue = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            encoded,
            json!({
                "command": "ERROR",
                "args": [],
                "kwargs": {"code": "badarg", "argument": "dim", "error": "bad value"}
            })
        );
    }

    #[test]
    fn test_line_ends_with_newline() {
        let line = Envelope::new(reply::OK).to_line().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
