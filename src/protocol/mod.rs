//! Wire messages exchanged with a remote runner.
//!
//! Every frame is one JSON object. Requests carry a `type` tag naming the verb;
//! replies carry only the verb-specific fields and are correlated purely by
//! position (at most one request is ever outstanding on a connection).

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request sent from the server to a runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    /// Handshake; must be the first request on every connection.
    Details,
    Command {
        command: Vec<String>,
    },
    BackgroundCommand {
        id: String,
        command: Vec<String>,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ReadFile {
        path: String,
    },
    SaveCache {
        key: String,
        paths: Vec<String>,
    },
    RestoreCache {
        key: String,
        paths: Vec<String>,
    },
    Log {
        message: String,
    },
    /// Opens a log group when `title` is present, closes the innermost one otherwise.
    Group {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Eval {
        expression: String,
        variables: Map<String, Value>,
    },
    SetEnv {
        name: String,
        value: String,
    },
}

impl Request {
    /// The wire name of this request's verb.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Details => "details",
            Request::Command { .. } => "command",
            Request::BackgroundCommand { .. } => "background-command",
            Request::WriteFile { .. } => "write-file",
            Request::ReadFile { .. } => "read-file",
            Request::SaveCache { .. } => "save-cache",
            Request::RestoreCache { .. } => "restore-cache",
            Request::Log { .. } => "log",
            Request::Group { .. } => "group",
            Request::Eval { .. } => "eval",
            Request::SetEnv { .. } => "set-env",
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reply to `details`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsReply {
    pub repository: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub id: u64,
    pub user_home: String,
}

/// Reply to `command`. A present `stderr` means the command failed; a reply
/// carrying neither field is malformed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandReply {
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
}

impl CommandReply {
    /// `Ok(stdout)` on success, `Err(stderr)` when the runner reported an
    /// error, `None` when the reply says neither.
    pub fn into_result(self) -> Option<Result<String, String>> {
        match (self.stdout, self.stderr) {
            (_, Some(err)) => Some(Err(err)),
            (Some(out), None) => Some(Ok(out)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackgroundCommandReply {
    #[serde(default)]
    pub output: String,
}

/// Reply to `read-file`. An absent `file` means the file does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReadFileReply {
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EvalReply {
    pub result: bool,
}

/// Reply to verbs whose acknowledgement carries nothing of interest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack;

impl<'de> Deserialize<'de> for Ack {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        de::IgnoredAny::deserialize(deserializer)?;
        Ok(Ack)
    }
}

/// Runners written in JavaScript may send large ids as strings.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("run id {n} is not a non-negative integer"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("run id {s:?} is not numeric"))),
        other => Err(de::Error::custom(format!("unexpected run id {other}"))),
    }
}

/// Parses one inbound frame into a JSON object.
pub fn parse_frame(text: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}
