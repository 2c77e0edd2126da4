//! Error data types shared by the OData execution core.
//!
//! Pure data, no HTTP framework dependency:
//! - RFC 9457 Problem Details (`Problem`)
//! - Static error catalog entries (`ErrDef`) and the OData catalog itself
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod catalog;
pub mod problem;

pub use catalog::ErrDef;
pub use problem::{APPLICATION_PROBLEM_JSON, Problem, ValidationViolation};

/// Attach the request instance path and an optional trace id to a problem.
pub fn finalize(mut p: Problem, instance: &str, trace_id: Option<String>) -> Problem {
    p = p.with_instance(instance);
    if let Some(tid) = trace_id {
        p = p.with_trace_id(tid);
    }
    p
}
