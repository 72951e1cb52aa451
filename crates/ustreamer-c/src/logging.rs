// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging for native engine hosts.
//!
//! The service emits `tracing` events; with the `log` feature enabled they
//! are forwarded to the `log` facade, and the `env_logger` installed here
//! prints them next to the host's own output. A host that already installed
//! a logger keeps it: every init call then reports `USTREAMER_ALREADY_EXISTS`
//! and the service logs through the existing one.
//!
//! # Example (C)
//! ```c
//! ustreamer_logging_init_with_filter("ustreamer_service=debug,warn");
//! // ... run the engine ...
//! ustreamer_logging_set_level(USTREAMER_LOG_WARN);
//! ```

use std::ffi::CStr;
use std::os::raw::c_char;

use crate::UStreamerCode;

/// Log level
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UStreamerLogLevel {
    UStreamerLogOff = 0,
    UStreamerLogError = 1,
    UStreamerLogWarn = 2,
    UStreamerLogInfo = 3,
    UStreamerLogDebug = 4,
    UStreamerLogTrace = 5,
}

impl From<UStreamerLogLevel> for log::LevelFilter {
    fn from(level: UStreamerLogLevel) -> Self {
        match level {
            UStreamerLogLevel::UStreamerLogOff => log::LevelFilter::Off,
            UStreamerLogLevel::UStreamerLogError => log::LevelFilter::Error,
            UStreamerLogLevel::UStreamerLogWarn => log::LevelFilter::Warn,
            UStreamerLogLevel::UStreamerLogInfo => log::LevelFilter::Info,
            UStreamerLogLevel::UStreamerLogDebug => log::LevelFilter::Debug,
            UStreamerLogLevel::UStreamerLogTrace => log::LevelFilter::Trace,
        }
    }
}

fn finish(builder: &mut env_logger::Builder) -> UStreamerCode {
    match builder.format_timestamp_millis().try_init() {
        Ok(()) => UStreamerCode::UStreamerOk,
        // A logger is already installed.
        Err(_) => UStreamerCode::UStreamerAlreadyExists,
    }
}

/// Initialize console logging at `level`.
///
/// # Safety
/// Must be called from a single thread during initialization.
///
/// # Returns
/// `USTREAMER_OK`, or `USTREAMER_ALREADY_EXISTS` if a logger is installed.
///
/// # Example (C)
/// ```c
/// ustreamer_logging_init(USTREAMER_LOG_INFO);
/// ```
#[no_mangle]
pub unsafe extern "C" fn ustreamer_logging_init(level: UStreamerLogLevel) -> UStreamerCode {
    finish(env_logger::Builder::new().filter_level(level.into()))
}

/// Initialize console logging from `RUST_LOG`, falling back to `default_level`.
///
/// # Safety
/// Must be called from a single thread during initialization.
#[no_mangle]
pub unsafe extern "C" fn ustreamer_logging_init_env(
    default_level: UStreamerLogLevel,
) -> UStreamerCode {
    let filter: log::LevelFilter = default_level.into();
    finish(&mut env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter.to_string()),
    ))
}

/// Initialize console logging with a filter string.
///
/// # Safety
/// `filter` must be a valid null-terminated C string or NULL.
///
/// # Example (C)
/// ```c
/// // Dispatch and bridge traces, warnings from everything else.
/// ustreamer_logging_init_with_filter("ustreamer_service=trace,warn");
/// ```
#[no_mangle]
pub unsafe extern "C" fn ustreamer_logging_init_with_filter(filter: *const c_char) -> UStreamerCode {
    if filter.is_null() {
        return UStreamerCode::UStreamerInvalidArgument;
    }
    let Ok(filter) = CStr::from_ptr(filter).to_str() else {
        return UStreamerCode::UStreamerInvalidArgument;
    };
    finish(env_logger::Builder::new().parse_filters(filter))
}

/// Change the global maximum level while the engine runs.
///
/// Events above `level` are discarded before reaching any logger, including
/// one the host installed itself. Per-module filters given at init still
/// apply below this ceiling.
#[no_mangle]
pub extern "C" fn ustreamer_logging_set_level(level: UStreamerLogLevel) {
    log::set_max_level(level.into());
}

/// Current global maximum level.
#[no_mangle]
pub extern "C" fn ustreamer_logging_level() -> UStreamerLogLevel {
    match log::max_level() {
        log::LevelFilter::Off => UStreamerLogLevel::UStreamerLogOff,
        log::LevelFilter::Error => UStreamerLogLevel::UStreamerLogError,
        log::LevelFilter::Warn => UStreamerLogLevel::UStreamerLogWarn,
        log::LevelFilter::Info => UStreamerLogLevel::UStreamerLogInfo,
        log::LevelFilter::Debug => UStreamerLogLevel::UStreamerLogDebug,
        log::LevelFilter::Trace => UStreamerLogLevel::UStreamerLogTrace,
    }
}
