//! Error catalog: static `ErrDef` entries for every problem the execution core emits.

use crate::problem::Problem;
use http::StatusCode;

/// Static error definition from catalog
#[derive(Debug, Clone, Copy)]
pub struct ErrDef {
    pub status: u16,
    pub title: &'static str,
    pub code: &'static str,
    pub type_url: &'static str,
}

impl ErrDef {
    /// Convert this error definition into a Problem with the given detail
    #[inline]
    pub fn as_problem(&self, detail: impl Into<String>) -> Problem {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Problem::new(status, self.title, detail.into())
            .with_code(self.code)
            .with_type(self.type_url)
    }
}

const TYPE_BASE: &str = "https://errors.odata-exec.dev/";

macro_rules! err_def {
    ($name:ident, $status:expr, $title:literal, $code:literal) => {
        pub const $name: ErrDef = ErrDef {
            status: $status,
            title: $title,
            code: $code,
            type_url: concat!("https://errors.odata-exec.dev/", $code),
        };
    };
}

/// Entries of the OData catalog, grouped by HTTP status.
pub mod odata {
    use super::ErrDef;

    // 400
    err_def!(INVALID_REQUEST, 400, "Invalid Request", "odata.invalid_request.v1");
    err_def!(INVALID_REFERENCE, 400, "Invalid Reference", "odata.invalid_reference.v1");
    err_def!(INVALID_KEY, 400, "Invalid Key", "odata.invalid_key.v1");
    err_def!(INVALID_BINDING, 400, "Invalid Binding", "odata.invalid_binding.v1");
    err_def!(INVALID_QUERY_OPTION, 400, "Invalid Query Option", "odata.invalid_query_option.v1");
    err_def!(INVALID_SKIP_TOKEN, 400, "Invalid Skip Token", "odata.invalid_skiptoken.v1");
    err_def!(INVALID_DELTA_TOKEN, 400, "Invalid Delta Token", "odata.invalid_deltatoken.v1");
    // 403
    err_def!(FORBIDDEN, 403, "Forbidden", "odata.forbidden.v1");
    // 404
    err_def!(NOT_FOUND, 404, "Not Found", "odata.not_found.v1");
    // 412
    err_def!(PRECONDITION_FAILED, 412, "Precondition Failed", "odata.precondition_failed.v1");
    // 501
    err_def!(NOT_IMPLEMENTED, 501, "Not Implemented", "odata.not_implemented.v1");
    // 500
    err_def!(INTERNAL, 500, "Internal Server Error", "odata.internal.v1");
}

/// Base URL all catalog `type` links are rooted at.
#[must_use]
pub fn type_base() -> &'static str {
    TYPE_BASE
}
