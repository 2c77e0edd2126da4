//! Input validation and safety limits for query options
//!
//! Caps that keep a single request from exhausting the store:
//! - Maximum `$top` value
//! - Maximum number of `$orderby` fields
//! - Maximum encoded `$skiptoken` length

use serde::{Deserialize, Serialize};

use crate::errors::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ODataLimits {
    /// Maximum value for $top (default: 1000)
    pub max_top: i64,
    /// Maximum number of fields in $orderby (default: 5)
    pub max_orderby_fields: usize,
    /// Maximum length of an encoded $skiptoken (default: 4096)
    pub max_skip_token_len: usize,
}

impl Default for ODataLimits {
    fn default() -> Self {
        Self {
            max_top: 1000,
            max_orderby_fields: 5,
            max_skip_token_len: 4096,
        }
    }
}

impl ODataLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_top(mut self, max_top: i64) -> Self {
        self.max_top = max_top;
        self
    }

    #[must_use]
    pub fn with_max_orderby_fields(mut self, max: usize) -> Self {
        self.max_orderby_fields = max;
        self
    }

    #[must_use]
    pub fn with_max_skip_token_len(mut self, max: usize) -> Self {
        self.max_skip_token_len = max;
        self
    }

    /// # Errors
    /// `Error::InvalidQueryOption` for a negative or oversized `$top`.
    pub fn validate_top(&self, top: i64) -> Result<(), Error> {
        if top < 0 {
            return Err(Error::query_option("$top", "must not be negative"));
        }
        if top > self.max_top {
            return Err(Error::query_option(
                "$top",
                format!("exceeds maximum of {}", self.max_top),
            ));
        }
        Ok(())
    }

    /// # Errors
    /// `Error::InvalidQueryOption` for a negative `$skip`.
    pub fn validate_skip(&self, skip: i64) -> Result<(), Error> {
        if skip < 0 {
            return Err(Error::query_option("$skip", "must not be negative"));
        }
        Ok(())
    }

    /// # Errors
    /// `Error::InvalidQueryOption` when too many `$orderby` fields are given.
    pub fn validate_orderby_count(&self, count: usize) -> Result<(), Error> {
        if count > self.max_orderby_fields {
            return Err(Error::query_option(
                "$orderby",
                format!("too many fields (max: {})", self.max_orderby_fields),
            ));
        }
        Ok(())
    }

    /// # Errors
    /// `Error::InvalidSkipToken` when the token exceeds the configured length.
    pub fn validate_skip_token(&self, token: &str) -> Result<(), Error> {
        if token.len() > self.max_skip_token_len {
            return Err(Error::InvalidSkipToken("token too long".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ODataLimits::default();
        assert_eq!(limits.max_top, 1000);
        assert_eq!(limits.max_orderby_fields, 5);
        assert_eq!(limits.max_skip_token_len, 4096);
    }

    #[test]
    fn test_validate_top() {
        let limits = ODataLimits::default();
        assert!(limits.validate_top(0).is_ok());
        assert!(limits.validate_top(1000).is_ok());
        assert!(limits.validate_top(1001).is_err());
        assert!(limits.validate_top(-1).is_err());
    }

    #[test]
    fn test_validate_skip_and_orderby() {
        let limits = ODataLimits::new().with_max_orderby_fields(2);
        assert!(limits.validate_skip(-3).is_err());
        assert!(limits.validate_skip(10).is_ok());
        assert!(limits.validate_orderby_count(2).is_ok());
        assert!(limits.validate_orderby_count(3).is_err());
    }

    #[test]
    fn test_skip_token_length() {
        let limits = ODataLimits::new().with_max_skip_token_len(8);
        assert!(limits.validate_skip_token("abcdefgh").is_ok());
        assert!(matches!(
            limits.validate_skip_token("abcdefghi"),
            Err(Error::InvalidSkipToken(_))
        ));
    }
}
