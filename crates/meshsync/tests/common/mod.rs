//! Shared test utilities for meshsync integration tests.
//!
//! This module provides:
//! - Builders for route rules and ingresses
//! - `ChannelSource`, an in-memory list+watch source
//! - `wait_until` for polling asynchronous outcomes

#![allow(dead_code)]

pub mod builders;
pub mod source;

use std::time::{Duration, Instant};

pub use builders::*;
pub use source::ChannelSource;

/// Polls `cond` until it holds or five seconds elapsed. Returns the last result.
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}
