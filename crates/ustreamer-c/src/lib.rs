// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # uStreamer C FFI Bindings
//!
//! C ABI for the engine side of the connection handoff. A native engine
//! fills a [`UStreamerEngineVTable`]; the host wraps it in an [`FfiEngine`]
//! and passes that to the service as its `BridgeEngine`.
//!
//! Inside `initialize` the engine receives two opaque handles, a
//! [`UStreamerConnection`] and a [`UStreamerSubscription`]. Every structured
//! value crossing the boundary is a type name plus a byte buffer.
//!
//! # Safety
//!
//! All public functions are `unsafe` and require the caller to uphold the
//! invariants documented in each function's safety comment.

mod engine;
mod handles;
mod logging;

pub use engine::*;
pub use handles::*;
pub use logging::*;

use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;
use ustreamer_service::{UCode, UPayload, UStatus};

/// Status codes (C-compatible enum). Numbering follows the service status codes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UStreamerCode {
    /// Operation completed successfully
    UStreamerOk = 0,
    UStreamerCancelled = 1,
    /// Unknown error, including a caught panic
    UStreamerUnknown = 2,
    /// Invalid argument (null pointer, malformed payload)
    UStreamerInvalidArgument = 3,
    UStreamerDeadlineExceeded = 4,
    UStreamerNotFound = 5,
    UStreamerAlreadyExists = 6,
    UStreamerPermissionDenied = 7,
    UStreamerResourceExhausted = 8,
    /// Call made in the wrong state (e.g. from an async context)
    UStreamerFailedPrecondition = 9,
    UStreamerAborted = 10,
    UStreamerOutOfRange = 11,
    UStreamerUnimplemented = 12,
    UStreamerInternal = 13,
    /// Transport down or handle revoked
    UStreamerUnavailable = 14,
    UStreamerDataLoss = 15,
    UStreamerUnauthenticated = 16,
}

impl From<UCode> for UStreamerCode {
    fn from(code: UCode) -> Self {
        match code {
            UCode::Ok => Self::UStreamerOk,
            UCode::Cancelled => Self::UStreamerCancelled,
            UCode::Unknown => Self::UStreamerUnknown,
            UCode::InvalidArgument => Self::UStreamerInvalidArgument,
            UCode::DeadlineExceeded => Self::UStreamerDeadlineExceeded,
            UCode::NotFound => Self::UStreamerNotFound,
            UCode::AlreadyExists => Self::UStreamerAlreadyExists,
            UCode::PermissionDenied => Self::UStreamerPermissionDenied,
            UCode::ResourceExhausted => Self::UStreamerResourceExhausted,
            UCode::FailedPrecondition => Self::UStreamerFailedPrecondition,
            UCode::Aborted => Self::UStreamerAborted,
            UCode::OutOfRange => Self::UStreamerOutOfRange,
            UCode::Unimplemented => Self::UStreamerUnimplemented,
            UCode::Internal => Self::UStreamerInternal,
            UCode::Unavailable => Self::UStreamerUnavailable,
            UCode::DataLoss => Self::UStreamerDataLoss,
            UCode::Unauthenticated => Self::UStreamerUnauthenticated,
        }
    }
}

impl From<UStreamerCode> for UCode {
    fn from(code: UStreamerCode) -> Self {
        UCode::from_i32(code as i32)
    }
}

/// Map a call result to a code, logging the failure under `operation`.
pub(crate) fn to_code(operation: &str, result: Result<(), UStatus>) -> UStreamerCode {
    match result {
        Ok(()) => UStreamerCode::UStreamerOk,
        Err(status) => {
            log::warn!("{}: {}", operation, status);
            status.code.into()
        }
    }
}

/// Get the library version string
///
/// # Safety
/// The returned pointer is valid for the lifetime of the process (static storage).
#[no_mangle]
pub unsafe extern "C" fn ustreamer_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr().cast::<c_char>()
}

/// Read a type name and `len` bytes into a payload.
///
/// Returns `None` for a null or non-UTF-8 type name, or null data with a
/// non-zero length.
///
/// # Safety
/// `type_name` must be null or a valid null-terminated C string; `data`
/// must be null or point to `len` readable bytes.
pub(crate) unsafe fn read_payload(
    type_name: *const c_char,
    data: *const u8,
    len: usize,
) -> Option<UPayload> {
    if type_name.is_null() || (data.is_null() && len > 0) {
        return None;
    }
    let type_name = CStr::from_ptr(type_name).to_str().ok()?;
    let bytes = if len == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(data, len).to_vec()
    };
    Some(UPayload::new(type_name, bytes))
}

/// Copy a Rust str into a C buffer. Returns bytes needed (excluding null).
pub(crate) fn copy_str_to_buf(s: &str, out_buf: *mut c_char, capacity: usize) -> usize {
    let needed = s.len();
    if !out_buf.is_null() && capacity > 0 {
        let copy_len = needed.min(capacity - 1);
        // SAFETY: the caller guarantees `out_buf` has `capacity` writable bytes.
        unsafe {
            ptr::copy_nonoverlapping(s.as_ptr(), out_buf.cast::<u8>(), copy_len);
            *out_buf.add(copy_len) = 0;
        }
    }
    needed
}
