//! Reporting of reconciliation outcomes to operators and end users.
pub mod controller;
mod k8s_events;
