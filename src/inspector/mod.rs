pub mod skopeo;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

pub use skopeo::SkopeoInspector;

/// Substrings of inspector stderr that mean "you can't see this image".
const AUTH_OR_NOT_FOUND_MARKERS: &[&str] = &["unauthorized", "forbidden", "not found"];

/// Registry login for one request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Both halves must be present; a lone username or password is dropped.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (non_empty(username), non_empty(password)) {
            (Some(username), Some(password)) => Some(Self {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        }
    }

    /// `user:pass` as `--creds` expects it.
    pub fn as_creds_arg(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials and proxy that travel with every external call of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    pub credentials: Option<Credentials>,
    pub proxy: Option<String>,
}

/// Which document the inspector should print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectMode {
    /// Merged, inspector-specific summary (`inspect`).
    Standard,
    /// The registry manifest exactly as served (`inspect --raw`).
    Raw,
    /// The image configuration blob (`inspect --config`).
    Config,
}

/// Classified result of one inspector invocation. Downstream code never
/// looks at exit codes.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Success(Value),
    AuthOrNotFound(String),
    OtherFailure(String),
}

impl InvocationOutcome {
    pub fn success(self) -> Option<Value> {
        match self {
            InvocationOutcome::Success(doc) => Some(doc),
            _ => None,
        }
    }

    /// Classify a finished process from its exit status and captured output.
    pub fn classify(exit_ok: bool, stdout: &[u8], stderr: &[u8]) -> Self {
        let stderr = String::from_utf8_lossy(stderr).trim().to_string();

        if !exit_ok {
            let lowered = stderr.to_lowercase();
            if AUTH_OR_NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
                return InvocationOutcome::AuthOrNotFound(stderr);
            }
            return InvocationOutcome::OtherFailure(stderr);
        }

        match serde_json::from_slice(stdout) {
            Ok(doc) => InvocationOutcome::Success(doc),
            Err(e) => InvocationOutcome::OtherFailure(format!("malformed inspector output: {e}")),
        }
    }
}

/// Common interface for the external image inspector.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Inspect `docker://<reference>` in the given mode.
    async fn inspect(&self, reference: &str, mode: InspectMode, access: &Access)
    -> InvocationOutcome;

    /// List tags for `docker://<repository>`.
    async fn list_tags(&self, repository: &str, access: &Access) -> InvocationOutcome;
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
