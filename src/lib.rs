//! Tollgate - Multi-Period Request Admission Control
//!
//! This crate decides whether a request from an identified client may
//! proceed, based on independent fixed-window counters per period
//! (minute, hour and day by default). Counters live behind the
//! [`ratelimit::CounterStore`] trait so a networked backend can replace the
//! in-memory one.

pub mod admission;
pub mod config;
pub mod error;
pub mod ratelimit;
