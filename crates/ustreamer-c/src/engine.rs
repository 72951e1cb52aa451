// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Native engine adapter.
//!
//! # Usage from C
//!
//! ```c
//! UStreamerCode my_init(UStreamerConnection* conn, UStreamerSubscription* sub,
//!                       char* out_text, size_t capacity, void* user_data) {
//!     // keep conn/sub until teardown, register listeners...
//!     snprintf(out_text, capacity, "engine up");
//!     return USTREAMER_OK;
//! }
//!
//! UStreamerCode my_teardown(char* out_text, size_t capacity, void* user_data) {
//!     snprintf(out_text, capacity, "engine down");
//!     return USTREAMER_OK;
//! }
//!
//! UStreamerEngineVTable vtable = { my_init, my_teardown, ctx };
//! ```

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

use parking_lot::Mutex;
use ustreamer_service::{
    BridgeEngine, ConnectionHandle, EngineError, SubscriptionHandle, UCode, UStatus,
};

use crate::handles::{
    lend_connection, lend_subscription, reclaim_connection, reclaim_subscription,
    UStreamerConnection, UStreamerSubscription,
};
use crate::UStreamerCode;

/// Capacity of the result-text buffer handed to engine callbacks.
pub const USTREAMER_RESULT_TEXT_CAPACITY: usize = 512;

/// Engine `initialize`: take over the lent handles.
///
/// The handles stay valid until `teardown` returns, or until `initialize`
/// itself returns if it fails. Write a human-readable result into
/// `out_text` (null-terminated, at most `capacity` bytes).
pub type UStreamerEngineInitFn = unsafe extern "C" fn(
    conn: *mut UStreamerConnection,
    sub: *mut UStreamerSubscription,
    out_text: *mut c_char,
    capacity: usize,
    user_data: *mut c_void,
) -> UStreamerCode;

/// Engine `teardown`: release everything acquired in `initialize`.
pub type UStreamerEngineTeardownFn =
    unsafe extern "C" fn(out_text: *mut c_char, capacity: usize, user_data: *mut c_void) -> UStreamerCode;

/// Native engine entry points.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct UStreamerEngineVTable {
    pub initialize: Option<UStreamerEngineInitFn>,
    pub teardown: Option<UStreamerEngineTeardownFn>,
    pub user_data: *mut c_void,
}

struct LentHandles {
    connection: *mut UStreamerConnection,
    subscription: *mut UStreamerSubscription,
}

impl Drop for LentHandles {
    fn drop(&mut self) {
        // SAFETY: both pointers come from `lend_*` and are reclaimed only here.
        unsafe {
            reclaim_connection(self.connection);
            reclaim_subscription(self.subscription);
        }
    }
}

/// [`BridgeEngine`] backed by a [`UStreamerEngineVTable`].
pub struct FfiEngine {
    initialize: UStreamerEngineInitFn,
    teardown: UStreamerEngineTeardownFn,
    user_data: *mut c_void,
    lent: Mutex<Option<LentHandles>>,
}

// SAFETY: the engine callbacks and user_data must be callable from any thread
// (documented in the C API). Lent pointers are only touched under the mutex.
unsafe impl Send for FfiEngine {}
unsafe impl Sync for FfiEngine {}

impl FfiEngine {
    /// Wrap `vtable`. Fails if an entry point is missing.
    pub fn new(vtable: UStreamerEngineVTable) -> Result<Self, UStatus> {
        let (Some(initialize), Some(teardown)) = (vtable.initialize, vtable.teardown) else {
            return Err(UStatus::fail_with_code(
                UCode::InvalidArgument,
                "engine vtable is missing an entry point",
            ));
        };
        Ok(Self {
            initialize,
            teardown,
            user_data: vtable.user_data,
            lent: Mutex::new(None),
        })
    }

    /// Check whether handles are currently lent to the engine.
    pub fn has_lent_handles(&self) -> bool {
        self.lent.lock().is_some()
    }
}

fn result_text(buf: &[u8]) -> String {
    CStr::from_bytes_until_nul(buf)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(buf).into_owned())
}

impl BridgeEngine for FfiEngine {
    fn initialize(
        &self,
        connection: ConnectionHandle,
        subscription: SubscriptionHandle,
    ) -> Result<String, EngineError> {
        let lent = LentHandles {
            connection: lend_connection(connection),
            subscription: lend_subscription(subscription),
        };
        let mut text = [0u8; USTREAMER_RESULT_TEXT_CAPACITY];
        let code = unsafe {
            (self.initialize)(
                lent.connection,
                lent.subscription,
                text.as_mut_ptr().cast::<c_char>(),
                text.len(),
                self.user_data,
            )
        };
        let text = result_text(&text);

        if code != UStreamerCode::UStreamerOk {
            // `lent` drops here: the handles die with the failed session.
            return Err(EngineError::Initialize(format!(
                "{} ({})",
                text,
                UCode::from(code)
            )));
        }
        *self.lent.lock() = Some(lent);
        Ok(text)
    }

    fn teardown(&self) -> Result<String, EngineError> {
        let mut text = [0u8; USTREAMER_RESULT_TEXT_CAPACITY];
        let code =
            unsafe { (self.teardown)(text.as_mut_ptr().cast::<c_char>(), text.len(), self.user_data) };
        self.lent.lock().take();

        let text = result_text(&text);
        if code == UStreamerCode::UStreamerOk {
            Ok(text)
        } else {
            Err(EngineError::Teardown(format!("{} ({})", text, UCode::from(code))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn write_text(out_text: *mut c_char, capacity: usize, text: &str) {
        crate::copy_str_to_buf(text, out_text, capacity);
    }

    unsafe extern "C" fn refuse_init(
        _conn: *mut UStreamerConnection,
        _sub: *mut UStreamerSubscription,
        out_text: *mut c_char,
        capacity: usize,
        _user_data: *mut c_void,
    ) -> UStreamerCode {
        write_text(out_text, capacity, "no license");
        UStreamerCode::UStreamerPermissionDenied
    }

    unsafe extern "C" fn quiet_teardown(
        _out_text: *mut c_char,
        _capacity: usize,
        _user_data: *mut c_void,
    ) -> UStreamerCode {
        UStreamerCode::UStreamerOk
    }

    #[test]
    fn test_missing_entry_points() {
        let vtable = UStreamerEngineVTable {
            initialize: None,
            teardown: Some(quiet_teardown),
            user_data: ptr::null_mut(),
        };
        let err = FfiEngine::new(vtable).err().expect("rejected");
        assert_eq!(err.code, UCode::InvalidArgument);
    }

    #[test]
    fn test_result_text() {
        assert_eq!(result_text(b"engine up\0garbage"), "engine up");
        assert_eq!(result_text(b"\0"), "");
        assert_eq!(result_text(b"unterminated"), "unterminated");
    }

    #[test]
    fn test_failed_initialize_releases_handles() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let transport = std::sync::Arc::new(ustreamer_service::LocalTransport::new(
            ustreamer_service::UEntity::new("example.streamer", 1),
        ));
        let registry = std::sync::Arc::new(ustreamer_service::LocalSubscriptionRegistry::new());
        let engine = FfiEngine::new(UStreamerEngineVTable {
            initialize: Some(refuse_init),
            teardown: Some(quiet_teardown),
            user_data: ptr::null_mut(),
        })
        .expect("engine");

        let err = engine
            .initialize(
                ConnectionHandle::new(transport, runtime.handle().clone()),
                SubscriptionHandle::new(registry, runtime.handle().clone()),
            )
            .unwrap_err();
        match err {
            EngineError::Initialize(text) => {
                assert!(text.contains("no license"));
                assert!(text.contains("PERMISSION_DENIED"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!engine.has_lent_handles());
        assert_eq!(engine.teardown().expect("teardown"), "");
    }
}
