#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Shared logic for the UPS switching-time tester.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing hardware seams as traits the other crates
// implement.

pub mod capture;
pub mod config;
pub mod kinds;
pub mod lifecycle;
pub mod load;
pub mod monitor;
pub mod orchestrator;
pub mod telemetry;
