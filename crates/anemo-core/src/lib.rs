//! Hardware-independent telemetry core for the anemo-rs weather station
//!
//! This crate contains the platform-agnostic logic of the device: sensor
//! trait definitions, the wind pulse counter, bucket and daily aggregation,
//! the in-memory history rings, the per-day CSV logs with retention, the
//! archive streamer, the password rate limiter and the request handlers.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod api;
pub mod app_state;
pub mod archive;
pub mod auth;
pub mod config;
pub mod metrics;
pub mod sampling;
pub mod sensors;
pub mod storage;
pub mod time;
