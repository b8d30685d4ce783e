//! Lease stores and the lease-based leader elector.

pub mod kube;
pub mod leader;
pub mod memory;
pub mod slate;
pub mod store;
