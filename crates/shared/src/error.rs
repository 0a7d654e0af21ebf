use crate::ids::{DeviceId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-visible error codes. These values appear verbatim in logs and in
/// `ErrorDetail.code`, so they must stay stable across releases.
pub mod codes {
    pub const NOT_FOUND_TASK: i32 = 1001;
    pub const MISMATCHED_DEVICE: i32 = 1002;
    pub const DEVICE_NOT_REGISTERED: i32 = 1003;
    pub const POLLING_EXCEPTION: i32 = 1004;
    pub const TIMEOUT: i32 = 1006;
    pub const UNKNOWN: i32 = 1007;
    pub const EXECUTION_EXCEPTION: i32 = 1008;
    pub const VALIDATION_EXCEPTION: i32 = 1009;
    pub const TASK_QUEUE_FULL: i32 = 1010;
    pub const PLC_CONNECTION_FAILED: i32 = 1011;

    /// Device-reported error codes (`error_code` word) are passed through
    /// verbatim and live in this range.
    pub const RUNNING_FAILURE_MIN: i32 = 1;
    pub const RUNNING_FAILURE_MAX: i32 = 102;
}

/// Message text for device-reported error codes.
///
/// Only a subset of the 1..102 range has agreed text with the PLC program;
/// unknown codes fall back to a generic message carrying the code.
pub fn running_failure_message(code: i16) -> String {
    match code {
        1 => "Emergency stop is active".to_string(),
        2 => "Drive fault on travel axis".to_string(),
        3 => "Drive fault on lift axis".to_string(),
        4 => "Pallet sensor blocked".to_string(),
        5 => "Source location is empty".to_string(),
        6 => "Target location is occupied".to_string(),
        7 => "Target location does not match".to_string(),
        8 => "Gate is not available".to_string(),
        9 => "Battery voltage too low".to_string(),
        10 => "Position lost, referencing required".to_string(),
        _ => format!("Device reported error code {}", code),
    }
}

/// Structured error payload attached to every `TaskFailed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: i32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub cause: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    pub fn with_cause(code: i32, message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Utc::now(),
            cause: Some(cause.into()),
        }
    }

    /// Stable formatting used in logs and operator-facing messages:
    /// `"[code] message"` plus an optional `"\nException: …"` line.
    pub fn full_message(&self) -> String {
        match &self.cause {
            Some(cause) => format!("[{}] {}\nException: {}", self.code, self.message, cause),
            None => format!("[{}] {}", self.code, self.message),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_message())
    }
}

/// Errores del gateway
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Validation task not found: {task_id}")]
    NotFoundTask { task_id: TaskId },

    #[error("Validation for task {task_id} expected device {expected} but got {actual}")]
    MismatchedDevice {
        task_id: TaskId,
        expected: DeviceId,
        actual: DeviceId,
    },

    #[error("Device not registered: {device_id}")]
    DeviceNotRegistered { device_id: DeviceId },

    #[error("Polling failed for task {task_id}: {message}")]
    PollingException { task_id: TaskId, message: String },

    #[error("{message}")]
    Timeout { message: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },

    #[error("Execution failed: {message}")]
    ExecutionException { message: String },

    #[error("Validation failed: {message}")]
    ValidationException { message: String },

    #[error("Task queue is full. Cannot enqueue task {task_id}. Current: {current}, Max: {max}")]
    TaskQueueFull {
        task_id: TaskId,
        current: usize,
        max: usize,
    },

    #[error("PLC connection failed for device {device_id}: {message}")]
    PlcConnectionFailed { device_id: DeviceId, message: String },

    /// Device-reported failure observed while a command was running. The
    /// code is the PLC `error_code` word, passed through verbatim.
    #[error("Device {device_id} reported failure {code}: {message}")]
    RunningFailure {
        device_id: DeviceId,
        code: i16,
        message: String,
    },

    /// A call that is not permitted in the current state of the gateway
    /// (duplicate ids, wrong queue state, missing required fields).
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },
}

impl GatewayError {
    /// The wire-visible numeric code for this error.
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::NotFoundTask { .. } => codes::NOT_FOUND_TASK,
            GatewayError::MismatchedDevice { .. } => codes::MISMATCHED_DEVICE,
            GatewayError::DeviceNotRegistered { .. } => codes::DEVICE_NOT_REGISTERED,
            GatewayError::PollingException { .. } => codes::POLLING_EXCEPTION,
            GatewayError::Timeout { .. } => codes::TIMEOUT,
            GatewayError::Unknown { .. } => codes::UNKNOWN,
            GatewayError::ExecutionException { .. } => codes::EXECUTION_EXCEPTION,
            GatewayError::ValidationException { .. } => codes::VALIDATION_EXCEPTION,
            GatewayError::TaskQueueFull { .. } => codes::TASK_QUEUE_FULL,
            GatewayError::PlcConnectionFailed { .. } => codes::PLC_CONNECTION_FAILED,
            GatewayError::RunningFailure { code, .. } => *code as i32,
            GatewayError::InvalidOperation { .. } => codes::UNKNOWN,
        }
    }

    /// Build the structured detail carried by `TaskFailed` events.
    pub fn detail(&self) -> ErrorDetail {
        match self {
            GatewayError::RunningFailure { code, message, .. } => {
                ErrorDetail::new(*code as i32, message.clone())
            }
            other => ErrorDetail::new(other.code(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail_full_message() {
        let detail = ErrorDetail::new(1006, "Timeout reached after 1 minutes");
        assert_eq!(detail.full_message(), "[1006] Timeout reached after 1 minutes");

        let with_cause = ErrorDetail::with_cause(1004, "read failed", "connection reset");
        assert_eq!(
            with_cause.full_message(),
            "[1004] read failed\nException: connection reset"
        );
    }

    #[test]
    fn test_gateway_error_codes() {
        let err = GatewayError::TaskQueueFull {
            task_id: TaskId::from("T_a"),
            current: 2,
            max: 2,
        };
        assert_eq!(err.code(), codes::TASK_QUEUE_FULL);
        assert_eq!(
            err.to_string(),
            "Task queue is full. Cannot enqueue task T_a. Current: 2, Max: 2"
        );
    }

    #[test]
    fn test_running_failure_passes_device_code_through() {
        let err = GatewayError::RunningFailure {
            device_id: DeviceId::from("SHUTTLE_01"),
            code: 7,
            message: running_failure_message(7),
        };
        assert_eq!(err.code(), 7);
        assert_eq!(err.detail().code, 7);
        assert_eq!(err.detail().message, "Target location does not match");
    }

    #[test]
    fn test_running_failure_unknown_code_fallback() {
        assert_eq!(running_failure_message(77), "Device reported error code 77");
    }
}
