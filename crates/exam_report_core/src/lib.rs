//! crates/exam_report_core/src/lib.rs
//!
//! Core domain for the exam report service: data model, ports, text post-processing,
//! report layout, the submission flow, the session state machine and billing.

pub mod billing;
pub mod domain;
pub mod ports;
pub mod report;
pub mod session;
pub mod submission;
pub mod text;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
