//! Operator managing `MyStatefulSet` objects: ordered, stable-identity pods
//! with per-ordinal storage claims.
pub mod admission;
pub mod cli;
pub mod controller;
pub mod crd;
pub mod labels;
pub mod logging;
pub mod naming;
pub mod signal;
pub mod store;
