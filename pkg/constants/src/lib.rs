//! Centralized constants for the lease-elector project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod kube;
pub mod network;
pub mod paths;
pub mod state;
