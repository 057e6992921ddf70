// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Logging macros shared by the sequencer crates.
//!
//! All records go through the `log` facade with a target of the form
//! `dssc.sequencer::<module path>`, so a host application can route or filter
//! the sequencer output independently of its own logging.

use std::sync::{atomic::AtomicBool, atomic::Ordering};

#[doc(hidden)]
pub use log as _log;

#[macro_export]
macro_rules! info {
    ($msg:literal, $($arg:tt)+) => {
        sequencer_log::_log::info!(target: concat!("dssc.sequencer::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        sequencer_log::_log::info!(target: concat!("dssc.sequencer::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! warn {
    ($msg:literal, $($arg:tt)+) => {
        sequencer_log::_log::warn!(target: concat!("dssc.sequencer::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        sequencer_log::_log::warn!(target: concat!("dssc.sequencer::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! error {
    ($msg:literal, $($arg:tt)+) => {
        sequencer_log::_log::error!(target: concat!("dssc.sequencer::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        sequencer_log::_log::error!(target: concat!("dssc.sequencer::", module_path!()), $msg);
    };
}

/// Log a diagnostic message at info level if diagnostics logging is enabled.
///
/// Used for register dumps (pattern slots, hold entries) that are too noisy
/// for regular operation.
#[macro_export]
macro_rules! diagnostic {
    ($msg:literal, $($arg:tt)+) => {
        if sequencer_log::is_diagnostics_enabled() {
            sequencer_log::_log::info!(target: concat!("dssc.sequencer::", module_path!()), $msg, $($arg)+);
        }
    };
    ($msg:literal) => {
        if sequencer_log::is_diagnostics_enabled() {
            sequencer_log::_log::info!(target: concat!("dssc.sequencer::", module_path!()), $msg);
        }
    };
}

static DIAGNOSTICS_ENABLED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_diagnostics_enabled() -> bool {
    DIAGNOSTICS_ENABLED.load(Ordering::Acquire)
}

/// Initialize the logging.
///
/// Sets the diagnostics flag only. Installing a concrete logger is left to the
/// host application; without one the `log` facade discards all records.
pub fn init_logging(with_diagnostics: bool) {
    DIAGNOSTICS_ENABLED.store(with_diagnostics, Ordering::Release);
}
