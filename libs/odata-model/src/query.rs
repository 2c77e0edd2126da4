//! Already-parsed system query options of one request.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::errors::Error;

// Ordering primitives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortDir {
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub dir: SortDir,
}

impl OrderKey {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: SortDir::Asc,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: SortDir::Desc,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct OrderBy(pub Vec<OrderKey>);

impl OrderBy {
    pub fn empty() -> Self {
        Self(vec![])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrderKey> {
        self.0.iter()
    }

    /// Parse `$orderby` text: `Name desc, ID`.
    ///
    /// # Errors
    /// Returns `Error::InvalidQueryOption` for empty items or unknown directions.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let mut out = Vec::new();
        for item in raw.split(',') {
            let mut words = item.split_whitespace();
            let field = words
                .next()
                .ok_or_else(|| Error::query_option("$orderby", "empty item"))?;
            let dir = match words.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("asc") => SortDir::Asc,
                Some("desc") => SortDir::Desc,
                Some(other) => {
                    return Err(Error::query_option(
                        "$orderby",
                        format!("unknown direction '{other}'"),
                    ));
                }
            };
            if words.next().is_some() {
                return Err(Error::query_option("$orderby", format!("malformed item '{}'", item.trim())));
            }
            out.push(OrderKey {
                field: field.to_owned(),
                dir,
            });
        }
        Ok(Self(out))
    }

    /// Append tiebreaker if missing
    pub fn ensure_tiebreaker(mut self, tiebreaker: &str, dir: SortDir) -> Self {
        if !self.0.iter().any(|k| k.field == tiebreaker) {
            self.0.push(OrderKey {
                field: tiebreaker.to_owned(),
                dir,
            });
        }
        self
    }

    /// Render back to `$orderby` text.
    #[must_use]
    pub fn to_query_value(&self) -> String {
        self.0
            .iter()
            .map(|k| match k.dir {
                SortDir::Asc => k.field.clone(),
                SortDir::Desc => format!("{} desc", k.field),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

// Display trait for human-readable orderby representation
impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(none)");
        }
        let formatted: Vec<String> = self
            .0
            .iter()
            .map(|key| format!("{} {}", key.field, key.dir.as_str()))
            .collect();
        write!(f, "{}", formatted.join(", "))
    }
}

/// Parsed query options of one request. Created per request and discarded after
/// the response is built.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct QueryOptions {
    pub top: Option<i64>,
    pub skip: Option<i64>,
    pub order_by: OrderBy,
    pub select: Option<Vec<String>>,
    pub expand: Vec<String>,
    pub count: bool,
    pub search: Option<String>,
    pub skip_token: Option<String>,
    pub delta_token: Option<String>,
    /// `Prefer: odata.track-changes`
    pub track_changes: bool,
    pub filter: Option<Expr>,
    /// Opaque `$apply` text, forwarded to the store.
    pub apply: Option<String>,
    /// Opaque `$compute` text, forwarded to the store.
    pub compute: Option<String>,
    /// Raw `$filter`/`$search`/... text as received, echoed into next links.
    pub passthrough: Vec<(String, String)>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top(mut self, top: i64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order_by = order;
        self
    }

    pub fn with_filter(mut self, expr: Expr) -> Self {
        self.filter = Some(expr);
        self
    }

    pub fn with_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_expand(mut self, nav: impl Into<String>) -> Self {
        self.expand.push(nav.into());
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_skip_token(mut self, token: impl Into<String>) -> Self {
        self.skip_token = Some(token.into());
        self
    }

    pub fn with_delta_token(mut self, token: impl Into<String>) -> Self {
        self.delta_token = Some(token.into());
        self
    }

    pub fn with_track_changes(mut self) -> Self {
        self.track_changes = true;
        self
    }

    pub fn with_apply(mut self, apply: impl Into<String>) -> Self {
        self.apply = Some(apply.into());
        self
    }

    pub fn with_compute(mut self, compute: impl Into<String>) -> Self {
        self.compute = Some(compute.into());
        self
    }

    pub fn with_passthrough(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.passthrough.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn selected_fields(&self) -> Option<&[String]> {
        self.select.as_deref()
    }
}
