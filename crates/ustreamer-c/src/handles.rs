// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection and subscription handle calls.
//!
//! Handles are lent to the engine by `initialize` and stay valid until
//! `teardown` returns. Once the service reclaims the connection every call
//! returns `USTREAMER_UNAVAILABLE`; the pointers themselves remain safe to
//! pass until `teardown` returns.
//!
//! All calls block. They must be made from engine threads, never from a
//! thread driving the service's async runtime.
//!
//! # Usage from C
//!
//! ```c
//! void on_envelope(uint64_t id, const char* type_name,
//!                  const uint8_t* data, size_t len, void* user_data) {
//!     // data[0..len] is a packed ustreamer.v1.UMessage
//! }
//!
//! UStreamerCode rc = ustreamer_connection_register_listener(
//!     conn, "ustreamer.v1.UUri", topic, topic_len, 7, on_envelope, ctx);
//! ```

use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::Arc;

use ustreamer_service::{ConnectionHandle, InboundSink, SubscriptionHandle, UPayload};

use crate::{copy_str_to_buf, read_payload, to_code, UStreamerCode};

/// Opaque handle to the lent transport connection.
#[repr(C)]
pub struct UStreamerConnection {
    _private: [u8; 0],
}

/// Opaque handle to the lent subscription registry proxy.
#[repr(C)]
pub struct UStreamerSubscription {
    _private: [u8; 0],
}

/// C callback receiving inbound envelopes.
///
/// # Parameters
/// - `listener_id`: Id passed to `ustreamer_connection_register_listener`.
/// - `type_name`: Null-terminated type name of the packed envelope.
/// - `data`, `len`: Packed envelope bytes, valid only during the call.
/// - `user_data`: User-provided context pointer.
///
/// Invoked on transport threads; it must be thread-safe and must not block.
pub type UStreamerInboundFn = unsafe extern "C" fn(
    listener_id: u64,
    type_name: *const c_char,
    data: *const u8,
    len: usize,
    user_data: *mut c_void,
);

/// Bridge from a C callback to [`InboundSink`].
struct CInboundBridge {
    callback: UStreamerInboundFn,
    user_data: *mut c_void,
}

// SAFETY: the C callback and user_data must be thread-safe (documented above).
unsafe impl Send for CInboundBridge {}
unsafe impl Sync for CInboundBridge {}

impl InboundSink for CInboundBridge {
    fn deliver(&self, listener_id: u64, message: &UPayload) {
        let Ok(type_name) = CString::new(message.type_name.as_str()) else {
            log::warn!("listener {}: type name contains a NUL byte", listener_id);
            return;
        };
        unsafe {
            (self.callback)(
                listener_id,
                type_name.as_ptr(),
                message.data.as_ptr(),
                message.data.len(),
                self.user_data,
            );
        }
    }
}

pub(crate) fn lend_connection(handle: ConnectionHandle) -> *mut UStreamerConnection {
    Box::into_raw(Box::new(handle)).cast::<UStreamerConnection>()
}

pub(crate) fn lend_subscription(handle: SubscriptionHandle) -> *mut UStreamerSubscription {
    Box::into_raw(Box::new(handle)).cast::<UStreamerSubscription>()
}

/// Reclaim a handle produced by [`lend_connection`].
///
/// # Safety
/// `raw` must come from [`lend_connection`] and not have been reclaimed yet.
pub(crate) unsafe fn reclaim_connection(raw: *mut UStreamerConnection) {
    if !raw.is_null() {
        drop(Box::from_raw(raw.cast::<ConnectionHandle>()));
    }
}

/// Reclaim a handle produced by [`lend_subscription`].
///
/// # Safety
/// `raw` must come from [`lend_subscription`] and not have been reclaimed yet.
pub(crate) unsafe fn reclaim_subscription(raw: *mut UStreamerSubscription) {
    if !raw.is_null() {
        drop(Box::from_raw(raw.cast::<SubscriptionHandle>()));
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Send a packed envelope (`ustreamer.v1.UMessage`).
///
/// # Safety
/// - `conn` must be a handle received in `initialize`, not yet reclaimed.
/// - `type_name` must be a valid null-terminated C string.
/// - `data` must point to `len` bytes (or be NULL if `len` is 0).
#[no_mangle]
pub unsafe extern "C" fn ustreamer_connection_send(
    conn: *const UStreamerConnection,
    type_name: *const c_char,
    data: *const u8,
    len: usize,
) -> UStreamerCode {
    if conn.is_null() {
        return UStreamerCode::UStreamerInvalidArgument;
    }
    let Some(message) = read_payload(type_name, data, len) else {
        return UStreamerCode::UStreamerInvalidArgument;
    };
    let handle = &*conn.cast::<ConnectionHandle>();
    to_code("ustreamer_connection_send", handle.send(&message))
}

/// Route envelopes for an address (`ustreamer.v1.UUri`) to `callback`.
///
/// `listener_id` is chosen by the engine and must be unique per connection.
///
/// # Safety
/// - `conn` must be a handle received in `initialize`, not yet reclaimed.
/// - `type_name` must be a valid null-terminated C string.
/// - `data` must point to `len` bytes.
/// - `callback` and `user_data` must stay valid until the listener is
///   unregistered or the connection is reclaimed.
#[no_mangle]
pub unsafe extern "C" fn ustreamer_connection_register_listener(
    conn: *const UStreamerConnection,
    type_name: *const c_char,
    data: *const u8,
    len: usize,
    listener_id: u64,
    callback: Option<UStreamerInboundFn>,
    user_data: *mut c_void,
) -> UStreamerCode {
    if conn.is_null() {
        return UStreamerCode::UStreamerInvalidArgument;
    }
    let Some(callback) = callback else {
        return UStreamerCode::UStreamerInvalidArgument;
    };
    let Some(address) = read_payload(type_name, data, len) else {
        return UStreamerCode::UStreamerInvalidArgument;
    };
    let handle = &*conn.cast::<ConnectionHandle>();
    let sink = Arc::new(CInboundBridge {
        callback,
        user_data,
    });
    to_code(
        "ustreamer_connection_register_listener",
        handle.register_listener(&address, listener_id, sink),
    )
}

/// Remove the listener registered under `listener_id`.
///
/// # Safety
/// `conn` must be a handle received in `initialize`, not yet reclaimed.
#[no_mangle]
pub unsafe extern "C" fn ustreamer_connection_unregister_listener(
    conn: *const UStreamerConnection,
    listener_id: u64,
) -> UStreamerCode {
    if conn.is_null() {
        return UStreamerCode::UStreamerInvalidArgument;
    }
    let handle = &*conn.cast::<ConnectionHandle>();
    to_code(
        "ustreamer_connection_unregister_listener",
        handle.unregister_listener(listener_id),
    )
}

/// Get the entity name owning the connection. Returns bytes needed (excluding null).
///
/// # Safety
/// - `conn` must be a handle received in `initialize`, or NULL.
/// - `out_buf` must point to `capacity` writable bytes, or be NULL.
#[no_mangle]
pub unsafe extern "C" fn ustreamer_connection_entity_name(
    conn: *const UStreamerConnection,
    out_buf: *mut c_char,
    capacity: usize,
) -> usize {
    if conn.is_null() {
        return 0;
    }
    let handle = &*conn.cast::<ConnectionHandle>();
    copy_str_to_buf(&handle.entity().name, out_buf, capacity)
}

/// Check whether the service has reclaimed the connection.
///
/// # Safety
/// `conn` must be a handle received in `initialize`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn ustreamer_connection_is_revoked(conn: *const UStreamerConnection) -> bool {
    if conn.is_null() {
        return true;
    }
    (*conn.cast::<ConnectionHandle>()).is_revoked()
}

// =============================================================================
// Subscription registry
// =============================================================================

/// Subscribe with a packed `ustreamer.v1.SubscriptionRequest`.
///
/// On success, `*out_reply` points to a packed `ustreamer.v1.SubscriptionResponse`
/// of `*out_reply_len` bytes. The caller MUST free it with `ustreamer_bytes_free()`.
///
/// # Safety
/// - `sub` must be a handle received in `initialize`, not yet reclaimed.
/// - `type_name` must be a valid null-terminated C string.
/// - `data` must point to `len` bytes.
/// - `out_reply` and `out_reply_len` must be valid pointers.
#[no_mangle]
pub unsafe extern "C" fn ustreamer_subscription_subscribe(
    sub: *const UStreamerSubscription,
    type_name: *const c_char,
    data: *const u8,
    len: usize,
    out_reply: *mut *mut u8,
    out_reply_len: *mut usize,
) -> UStreamerCode {
    if sub.is_null() || out_reply.is_null() || out_reply_len.is_null() {
        return UStreamerCode::UStreamerInvalidArgument;
    }
    *out_reply = ptr::null_mut();
    *out_reply_len = 0;
    let Some(request) = read_payload(type_name, data, len) else {
        return UStreamerCode::UStreamerInvalidArgument;
    };

    let handle = &*sub.cast::<SubscriptionHandle>();
    match handle.subscribe(&request) {
        Ok(reply) => {
            let boxed = reply.data.into_boxed_slice();
            let reply_len = boxed.len();
            if reply_len > 0 {
                *out_reply = Box::into_raw(boxed).cast::<u8>();
                *out_reply_len = reply_len;
            }
            UStreamerCode::UStreamerOk
        }
        Err(status) => to_code("ustreamer_subscription_subscribe", Err(status)),
    }
}

/// Create a topic with a packed `ustreamer.v1.CreateTopicRequest`.
///
/// # Safety
/// - `sub` must be a handle received in `initialize`, not yet reclaimed.
/// - `type_name` must be a valid null-terminated C string.
/// - `data` must point to `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ustreamer_subscription_create_topic(
    sub: *const UStreamerSubscription,
    type_name: *const c_char,
    data: *const u8,
    len: usize,
) -> UStreamerCode {
    if sub.is_null() {
        return UStreamerCode::UStreamerInvalidArgument;
    }
    let Some(request) = read_payload(type_name, data, len) else {
        return UStreamerCode::UStreamerInvalidArgument;
    };
    let handle = &*sub.cast::<SubscriptionHandle>();
    to_code(
        "ustreamer_subscription_create_topic",
        handle.create_topic(&request),
    )
}

/// Free a buffer returned by `ustreamer_subscription_subscribe`.
///
/// # Safety
/// - `buf` must be a pointer previously returned in `out_reply`, or NULL.
/// - `len` must match the `out_reply_len` value from that same call.
/// - Must only be called once per buffer.
#[no_mangle]
pub unsafe extern "C" fn ustreamer_bytes_free(buf: *mut u8, len: usize) {
    if !buf.is_null() && len > 0 {
        drop(Box::from_raw(std::slice::from_raw_parts_mut(buf, len)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    unsafe extern "C" fn ignore(
        _listener_id: u64,
        _type_name: *const c_char,
        _data: *const u8,
        _len: usize,
        _user_data: *mut c_void,
    ) {
    }

    #[test]
    fn test_null_safety() {
        let type_name = CString::new("ustreamer.v1.UUri").expect("cstring");
        let mut reply: *mut u8 = ptr::null_mut();
        let mut reply_len = 0usize;
        unsafe {
            assert_eq!(
                ustreamer_connection_send(ptr::null(), type_name.as_ptr(), ptr::null(), 0),
                UStreamerCode::UStreamerInvalidArgument,
            );
            assert_eq!(
                ustreamer_connection_register_listener(
                    ptr::null(),
                    type_name.as_ptr(),
                    ptr::null(),
                    0,
                    1,
                    Some(ignore),
                    ptr::null_mut(),
                ),
                UStreamerCode::UStreamerInvalidArgument,
            );
            assert_eq!(
                ustreamer_connection_unregister_listener(ptr::null(), 1),
                UStreamerCode::UStreamerInvalidArgument,
            );
            assert_eq!(
                ustreamer_connection_entity_name(ptr::null(), ptr::null_mut(), 0),
                0
            );
            assert!(ustreamer_connection_is_revoked(ptr::null()));

            assert_eq!(
                ustreamer_subscription_subscribe(
                    ptr::null(),
                    type_name.as_ptr(),
                    ptr::null(),
                    0,
                    &mut reply,
                    &mut reply_len,
                ),
                UStreamerCode::UStreamerInvalidArgument,
            );
            assert_eq!(
                ustreamer_subscription_create_topic(ptr::null(), type_name.as_ptr(), ptr::null(), 0),
                UStreamerCode::UStreamerInvalidArgument,
            );
            ustreamer_bytes_free(ptr::null_mut(), 0);
            reclaim_connection(ptr::null_mut());
            reclaim_subscription(ptr::null_mut());
        }
    }

    #[test]
    fn test_bytes_free_roundtrip() {
        unsafe {
            let boxed = vec![4u8, 2].into_boxed_slice();
            let len = boxed.len();
            let buf = Box::into_raw(boxed).cast::<u8>();
            assert_eq!(std::slice::from_raw_parts(buf, len), &[4, 2]);
            ustreamer_bytes_free(buf, len);
        }
    }
}
