// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unified status taxonomy.
//!
//! `UStatus` is the single result/error carrier crossing every boundary of the
//! service: transport calls, registry calls, handler replies and the bridge
//! handles. Fallible operations return `Result<T, UStatus>`; replies carry a
//! packed `UStatus` whose code may be `Ok`.

use crate::message::PayloadType;
use crate::uri::UUri;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status codes (gRPC canonical numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum UCode {
    /// Success.
    #[default]
    Ok = 0,
    /// Operation cancelled by the caller.
    Cancelled = 1,
    /// Unknown error (e.g. an unexpected panic).
    Unknown = 2,
    /// Malformed or unrecognized input.
    InvalidArgument = 3,
    /// Deadline expired before completion.
    DeadlineExceeded = 4,
    /// Requested entity not found.
    NotFound = 5,
    /// Entity already exists.
    AlreadyExists = 6,
    /// Caller lacks permission.
    PermissionDenied = 7,
    /// Resource (queue, quota) exhausted.
    ResourceExhausted = 8,
    /// System not in the required state.
    FailedPrecondition = 9,
    /// Operation aborted.
    Aborted = 10,
    /// Value out of range.
    OutOfRange = 11,
    /// Operation not implemented.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// Peer or transport unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss.
    DataLoss = 15,
    /// Missing or invalid credentials.
    Unauthenticated = 16,
}

impl UCode {
    /// Convert from i32; unmapped values become `Unknown`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Convert to i32.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Upper-snake name used in logs (`INVALID_ARGUMENT`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for UCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status value: a code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct UStatus {
    /// Status code.
    pub code: UCode,
    /// Diagnostic message (empty on success).
    #[serde(default)]
    pub message: String,
}

impl UStatus {
    /// Successful status.
    pub fn ok() -> Self {
        Self {
            code: UCode::Ok,
            message: String::new(),
        }
    }

    /// Failure with an explicit code.
    pub fn fail_with_code(code: UCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Check if this status is `Ok`.
    pub fn is_ok(&self) -> bool {
        self.code == UCode::Ok
    }

    /// Collapse a unit result into a status value (for replies and logs).
    pub fn from_result(result: &Result<(), UStatus>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(status) => status.clone(),
        }
    }

    /// Convert this status into a unit result.
    pub fn into_result(self) -> Result<(), UStatus> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Convert a caught panic payload into a status.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::fail_with_code(UCode::Unknown, format!("handler panicked: {}", detail))
    }
}

impl PayloadType for UStatus {
    const TYPE_NAME: &'static str = "ustreamer.v1.UStatus";
}

/// Fail with `InvalidArgument` unless `condition` holds.
pub fn check_argument(condition: bool, message: impl Into<String>) -> Result<(), UStatus> {
    if condition {
        Ok(())
    } else {
        Err(UStatus::fail_with_code(UCode::InvalidArgument, message))
    }
}

/// Log the outcome of a boundary operation: INFO on success, ERROR otherwise.
pub fn log_status<'a>(
    operation: &str,
    result: &'a Result<(), UStatus>,
    uri: Option<&UUri>,
) -> &'a Result<(), UStatus> {
    match (result, uri) {
        (Ok(()), Some(uri)) => tracing::info!(%uri, "{}: OK", operation),
        (Ok(()), None) => tracing::info!("{}: OK", operation),
        (Err(status), Some(uri)) => tracing::error!(
            %uri,
            code = status.code.name(),
            "{}: {}",
            operation,
            status.message
        ),
        (Err(status), None) => {
            tracing::error!(code = status.code.name(), "{}: {}", operation, status.message)
        }
    }
    result
}
