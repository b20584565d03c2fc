//! Workload agent: HTTP surface and configuration for the control loop

pub mod api;
pub mod config;
