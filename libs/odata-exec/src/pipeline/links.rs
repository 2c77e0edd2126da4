//! Next and delta link rendering.

use odata_model::{Error, QueryOptions};

/// Options the pipeline renders itself; passthrough copies of them are dropped.
const RENDERED: &[&str] = &[
    "$top",
    "$skip",
    "$skiptoken",
    "$orderby",
    "$select",
    "$expand",
    "$count",
    "$search",
    "$deltatoken",
];

/// Where the next page continues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Continuation {
    Token(String),
    /// Offset fallback when no token could be built.
    Offset(u64),
}

/// `{root}/{path}?{options}` for the page after the current one.
///
/// Structural options come from `options`; everything else (`$filter`,
/// `$apply`, custom parameters) is echoed from the raw passthrough pairs.
///
/// # Errors
/// `Error::Internal` if the query string cannot be encoded.
pub fn next_link(root: &str, path: &str, options: &QueryOptions, next: &Continuation) -> Result<String, Error> {
    let mut pairs: Vec<(String, String)> = options
        .passthrough
        .iter()
        .filter(|(name, _)| !RENDERED.contains(&name.as_str()))
        .cloned()
        .collect();

    if !options.order_by.is_empty() {
        pairs.push(("$orderby".into(), options.order_by.to_query_value()));
    }
    if let Some(select) = &options.select {
        pairs.push(("$select".into(), select.join(",")));
    }
    if !options.expand.is_empty() {
        pairs.push(("$expand".into(), options.expand.join(",")));
    }
    if let Some(search) = &options.search {
        pairs.push(("$search".into(), search.clone()));
    }
    if options.count {
        pairs.push(("$count".into(), "true".into()));
    }
    if let Some(top) = options.top {
        pairs.push(("$top".into(), top.to_string()));
    }
    match next {
        Continuation::Token(token) => pairs.push(("$skiptoken".into(), token.clone())),
        Continuation::Offset(skip) => {
            // a position token from the request still applies before the offset
            if let Some(token) = &options.skip_token {
                pairs.push(("$skiptoken".into(), token.clone()));
            }
            pairs.push(("$skip".into(), skip.to_string()));
        }
    }
    render(root, path, &pairs)
}

/// `{root}/{path}?$deltatoken={token}`
///
/// # Errors
/// `Error::Internal` if the query string cannot be encoded.
pub fn delta_link(root: &str, path: &str, token: &str) -> Result<String, Error> {
    render(root, path, &[("$deltatoken".to_owned(), token.to_owned())])
}

fn render(root: &str, path: &str, pairs: &[(String, String)]) -> Result<String, Error> {
    let query = serde_urlencoded::to_string(pairs).map_err(|e| Error::internal(format!("link encoding: {e}")))?;
    Ok(format!("{root}/{path}?{query}"))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use odata_model::OrderBy;

    #[test]
    fn token_link_keeps_other_options() {
        let options = QueryOptions::new()
            .with_top(2)
            .with_order(OrderBy::parse("Name desc").unwrap())
            .with_passthrough("$filter", "Price gt 5")
            .with_passthrough("$top", "2")
            .with_passthrough("$skip", "4");
        let link = next_link("/odata", "Products", &options, &Continuation::Token("abc".into())).unwrap();
        assert_eq!(
            link,
            "/odata/Products?%24filter=Price+gt+5&%24orderby=Name+desc&%24top=2&%24skiptoken=abc"
        );
    }

    #[test]
    fn offset_fallback_carries_skip() {
        let options = QueryOptions::new().with_top(3).with_count();
        let link = next_link("/odata", "Customers(1)/Orders", &options, &Continuation::Offset(6)).unwrap();
        assert_eq!(link, "/odata/Customers(1)/Orders?%24count=true&%24top=3&%24skip=6");
    }

    #[test]
    fn delta_link_is_root_relative() {
        assert_eq!(
            delta_link("https://h/svc", "Orders", "T1").unwrap(),
            "https://h/svc/Orders?%24deltatoken=T1"
        );
    }
}
