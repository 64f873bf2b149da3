use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use crate::common::BridgeError;

/// What a command hands back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Ok(Option<Value>),
    Error { code: &'static str, message: String },
}

impl CommandResponse {
    pub fn ack() -> Self {
        CommandResponse::Ok(None)
    }

    pub fn ok(payload: Value) -> Self {
        CommandResponse::Ok(Some(payload))
    }

    pub fn from_error(error: &BridgeError) -> Self {
        CommandResponse::Error {
            code: error.code(),
            message: error.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandResponse::Ok(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            CommandResponse::Ok(payload) => payload.as_ref(),
            CommandResponse::Error { .. } => None,
        }
    }

    pub fn code(&self) -> Option<&'static str> {
        match self {
            CommandResponse::Ok(_) => None,
            CommandResponse::Error { code, .. } => Some(code),
        }
    }
}

/// Receives responses. Called only from the delivery thread.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, response: CommandResponse);
}

impl<F> ResultSink for F
where
    F: Fn(CommandResponse) + Send + Sync,
{
    fn deliver(&self, response: CommandResponse) {
        self(response)
    }
}

/// The addressee of a request's response.
#[derive(Clone)]
pub struct CallerHandle {
    id: String,
    sink: Arc<dyn ResultSink>,
}

impl CallerHandle {
    pub fn new(id: impl Into<String>, sink: Arc<dyn ResultSink>) -> Self {
        Self { id: id.into(), sink }
    }

    pub fn from_fn<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(CommandResponse) + Send + Sync + 'static,
    {
        Self::new(id, Arc::new(f))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn deliver(&self, response: CommandResponse) {
        self.sink.deliver(response);
    }
}

impl fmt::Debug for CallerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerHandle").field("id", &self.id).finish()
    }
}
