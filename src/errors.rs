//! Two-layer error model: `CommandError` carries a safe/unsafe message split for
//! subprocess and Kubernetes API failures that may leak secrets in their raw form;
//! `EngineError` wraps it with a `Tag` discriminant and `EventDetails` context.

use crate::cmd::command::CommandError as SubprocessError;
use crate::events::EventDetails;
use derivative::Derivative;
use std::fmt;

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct CommandError {
    full_details: Option<String>,
    message_safe: String,
    #[derivative(Debug = "ignore")]
    env_vars: Option<Vec<(String, String)>>,
}

impl CommandError {
    pub fn new(message_safe: String, full_details: Option<String>, env_vars: Option<Vec<(String, String)>>) -> Self {
        CommandError {
            full_details,
            message_safe,
            env_vars,
        }
    }

    pub fn new_from_safe_message(message: String) -> Self {
        CommandError::new(message, None, None)
    }

    pub fn message_safe(&self) -> &str {
        &self.message_safe
    }

    pub fn message_raw(&self) -> String {
        match &self.full_details {
            Some(details) => format!("{}: {}", self.message_safe, details),
            None => self.message_safe.clone(),
        }
    }
}

impl From<SubprocessError> for CommandError {
    fn from(err: SubprocessError) -> Self {
        CommandError::new(err.to_string(), None, None)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message_safe)
    }
}

/// Discriminant for the handful of failure kinds this domain actually produces.
/// Deliberately not the exhaustive per-cloud-provider tag list a full platform carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    ConfigError,
    RemoteAPIError,
    Timeout,
    Supersession,
    PodsNotReady,
    Unknown,
}

#[derive(thiserror::Error, Clone, Debug)]
#[error("{user_log_message}")]
pub struct EngineError {
    tag: Tag,
    event_details: EventDetails,
    user_log_message: String,
    underlying_error: Option<CommandError>,
}

impl EngineError {
    fn new(tag: Tag, event_details: EventDetails, user_log_message: String, underlying_error: Option<CommandError>) -> Self {
        EngineError {
            tag,
            event_details,
            user_log_message,
            underlying_error,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn event_details(&self) -> &EventDetails {
        &self.event_details
    }

    pub fn user_log_message(&self) -> &str {
        &self.user_log_message
    }

    pub fn underlying_error(&self) -> Option<&CommandError> {
        self.underlying_error.as_ref()
    }

    pub fn new_config_error(event_details: EventDetails, message: String) -> Box<EngineError> {
        Box::new(EngineError::new(
            Tag::ConfigError,
            event_details,
            format!("configuration validation failed: {message}"),
            None,
        ))
    }

    pub fn new_remote_api_error(event_details: EventDetails, message: String, underlying: Option<CommandError>) -> Box<EngineError> {
        Box::new(EngineError::new(Tag::RemoteAPIError, event_details, message, underlying))
    }

    pub fn new_timeout(event_details: EventDetails, message: String) -> Box<EngineError> {
        Box::new(EngineError::new(Tag::Timeout, event_details, message, None))
    }

    pub fn new_supersession(event_details: EventDetails, message: String) -> Box<EngineError> {
        Box::new(EngineError::new(Tag::Supersession, event_details, message, None))
    }

    pub fn new_pods_not_ready(event_details: EventDetails, message: String) -> Box<EngineError> {
        Box::new(EngineError::new(Tag::PodsNotReady, event_details, message, None))
    }

    pub fn new_unknown(event_details: EventDetails, message: String, underlying: Option<CommandError>) -> Box<EngineError> {
        Box::new(EngineError::new(Tag::Unknown, event_details, message, underlying))
    }
}
