//! Mapping from execution-core errors to Problem (pure data)
//!
//! The transport layer adds instance paths and trace ids through
//! [`odata_errors::finalize`] before serializing.

use odata_errors::Problem;
use odata_errors::catalog::odata as catalog;

use crate::errors::Error;

impl From<Error> for Problem {
    fn from(err: Error) -> Self {
        let detail = err.to_string();
        match err {
            Error::InvalidReference(_) => catalog::INVALID_REFERENCE.as_problem(detail),
            Error::InvalidKey(_) => catalog::INVALID_KEY.as_problem(detail),
            Error::InvalidBinding { property, reason } => catalog::INVALID_BINDING
                .as_problem(detail)
                .with_errors(vec![odata_errors::ValidationViolation {
                    field: property,
                    message: reason,
                    code: None,
                }]),
            Error::InvalidQueryOption { .. } => catalog::INVALID_QUERY_OPTION.as_problem(detail),
            Error::InvalidSkipToken(_) => catalog::INVALID_SKIP_TOKEN.as_problem(detail),
            Error::InvalidDeltaToken => catalog::INVALID_DELTA_TOKEN.as_problem(detail),
            Error::Validation(_) => catalog::INVALID_REQUEST.as_problem(detail),
            Error::Forbidden(_) => catalog::FORBIDDEN.as_problem(detail),
            Error::NotFound(_) => catalog::NOT_FOUND.as_problem(detail),
            Error::PreconditionFailed => catalog::PRECONDITION_FAILED.as_problem(detail),
            Error::NotImplemented(_) => catalog::NOT_IMPLEMENTED.as_problem(detail),
            // storage details stay in the logs
            Error::Internal(_) => catalog::INTERNAL
                .as_problem("An internal error occurred while processing the OData request"),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn binding_error_carries_violation() {
        let problem: Problem = Error::binding("Customer@odata.bind", "expected a string").into();
        assert_eq!(problem.status, StatusCode::BAD_REQUEST);
        assert_eq!(problem.code, "odata.invalid_binding.v1");
        let errors = problem.errors.unwrap();
        assert_eq!(errors[0].field, "Customer@odata.bind");
    }

    #[test]
    fn internal_error_hides_detail() {
        let problem: Problem = Error::internal("sqlite: disk I/O error").into();
        assert_eq!(problem.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!problem.detail.contains("sqlite"));
    }

    #[test]
    fn precondition_and_not_found() {
        let p: Problem = Error::PreconditionFailed.into();
        assert_eq!(p.status, StatusCode::PRECONDITION_FAILED);
        let p: Problem = Error::not_found("Orders(9)").into();
        assert_eq!(p.status, StatusCode::NOT_FOUND);
        assert!(p.detail.contains("Orders(9)"));
    }
}
