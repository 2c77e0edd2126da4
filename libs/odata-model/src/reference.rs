//! Entity reference grammar.
//!
//! `[scheme://host[/path]/]EntitySet(key|K1=V1[,K2=V2...])`, as used by
//! `@odata.bind` and `@odata.id`.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("empty entity reference")]
    Empty,

    #[error("entity reference '{0}' has no key segment")]
    MissingKey(String),

    #[error("entity reference '{0}' has unbalanced parentheses or quotes")]
    Unbalanced(String),

    #[error("entity reference '{0}' has no entity set name")]
    MissingEntitySet(String),

    #[error("entity reference '{0}' has an empty key")]
    EmptyKey(String),

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("invalid percent-encoding in '{0}'")]
    InvalidEncoding(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositeKeyError {
    /// No `=` anywhere: the caller should treat the key as a single value.
    #[error("key is not composite")]
    NotComposite,

    #[error("malformed composite key '{0}'")]
    Malformed(String),
}

/// An entity set name and its raw key text, as found inside the parentheses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRef {
    pub entity_set: String,
    pub key: String,
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.entity_set, self.key)
    }
}

/// Render the canonical reference form `Set(key)`.
#[must_use]
pub fn format_reference(entity_set: &str, key: &str) -> String {
    format!("{entity_set}({key})")
}

/// Parse a bare, root-relative or absolute entity reference.
///
/// # Errors
/// Returns `ReferenceError` when the text does not end in a well-formed
/// `Set(key)` segment.
pub fn parse_reference(reference: &str) -> Result<EntityRef, ReferenceError> {
    let raw = reference.trim();
    if raw.is_empty() {
        return Err(ReferenceError::Empty);
    }

    let path = if raw.contains("://") {
        let url = url::Url::parse(raw).map_err(|_| ReferenceError::InvalidUrl(raw.to_owned()))?;
        url.path().to_owned()
    } else {
        strip_query(raw).to_owned()
    };

    let decoded = urlencoding::decode(&path)
        .map_err(|_| ReferenceError::InvalidEncoding(raw.to_owned()))?
        .into_owned();

    let segment = last_segment(&decoded);
    let open = segment
        .find('(')
        .ok_or_else(|| ReferenceError::MissingKey(raw.to_owned()))?;

    let entity_set = &segment[..open];
    if entity_set.is_empty() {
        return Err(ReferenceError::MissingEntitySet(raw.to_owned()));
    }

    let close = matching_paren(segment, open).ok_or_else(|| ReferenceError::Unbalanced(raw.to_owned()))?;
    if close != segment.len() - 1 {
        return Err(ReferenceError::Unbalanced(raw.to_owned()));
    }

    let key = segment[open + 1..close].trim();
    if key.is_empty() {
        return Err(ReferenceError::EmptyKey(raw.to_owned()));
    }

    Ok(EntityRef {
        entity_set: entity_set.to_owned(),
        key: key.to_owned(),
    })
}

/// Split `K1=V1,K2=V2` into name/value pairs with surrounding quotes removed.
///
/// # Errors
/// `CompositeKeyError::NotComposite` when the key has no top-level `=`;
/// `Malformed` for empty names or values, or a mix of named and bare parts.
pub fn parse_composite_key(key: &str) -> Result<Vec<(String, String)>, CompositeKeyError> {
    Ok(split_composite_key(key)?
        .into_iter()
        .map(|(name, literal)| (name, strip_quotes(&literal)))
        .collect())
}

/// Like [`parse_composite_key`] but keeps each value literal as written.
///
/// # Errors
/// Same as [`parse_composite_key`].
pub fn split_composite_key(key: &str) -> Result<Vec<(String, String)>, CompositeKeyError> {
    let parts = split_top_level(key, ',');
    if parts.iter().all(|p| find_top_level(p, '=').is_none()) {
        return Err(CompositeKeyError::NotComposite);
    }

    let mut pairs = Vec::with_capacity(parts.len());
    for part in parts {
        let eq = find_top_level(part, '=').ok_or_else(|| CompositeKeyError::Malformed(key.to_owned()))?;
        let name = part[..eq].trim();
        let value = part[eq + 1..].trim();
        if name.is_empty() || value.is_empty() {
            return Err(CompositeKeyError::Malformed(key.to_owned()));
        }
        pairs.push((name.to_owned(), value.to_owned()));
    }
    Ok(pairs)
}

fn strip_quotes(literal: &str) -> String {
    let t = literal.trim();
    if t.len() >= 2 {
        if t.starts_with('\'') && t.ends_with('\'') {
            return t[1..t.len() - 1].replace("''", "'");
        }
        if t.starts_with('"') && t.ends_with('"') {
            return t[1..t.len() - 1].to_owned();
        }
    }
    t.to_owned()
}

/// Cut `?query` / `#fragment` from a relative reference, ignoring quoted text.
fn strip_query(raw: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in raw.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '?' | '#') => return &raw[..i],
            _ => {}
        }
    }
    raw
}

/// Final `/`-separated segment, ignoring slashes inside parentheses or quotes.
fn last_segment(path: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => start = i + 1,
            _ => {}
        }
    }
    &path[start..]
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (i, c) in s[open..].char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '(') => depth += 1,
            (None, ')') => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, c) if c == sep => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn find_top_level(s: &str, needle: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, c) if c == needle => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn ok(r: &str) -> (String, String) {
        let e = parse_reference(r).unwrap();
        (e.entity_set, e.key)
    }

    #[test]
    fn bare_relative_and_absolute_forms() {
        assert_eq!(ok("Categories(1)"), ("Categories".into(), "1".into()));
        assert_eq!(ok("/svc/Categories(1)"), ("Categories".into(), "1".into()));
        assert_eq!(
            ok("http://host/svc/Categories(1)"),
            ("Categories".into(), "1".into())
        );
        assert_eq!(
            ok("https://host:8443/a/b/Orders(OrderID=1,Line='x')"),
            ("Orders".into(), "OrderID=1,Line='x'".into())
        );
    }

    #[test]
    fn slashes_and_parens_inside_quotes() {
        assert_eq!(
            ok("Files('a/b(c)')"),
            ("Files".into(), "'a/b(c)'".into())
        );
        assert_eq!(ok("People('O''Neil')"), ("People".into(), "'O''Neil'".into()));
    }

    #[test]
    fn percent_encoded_absolute_url() {
        assert_eq!(
            ok("http://host/svc/People('John%20Doe')"),
            ("People".into(), "'John Doe'".into())
        );
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(parse_reference("  "), Err(ReferenceError::Empty));
        assert!(matches!(parse_reference("Categories"), Err(ReferenceError::MissingKey(_))));
        assert!(matches!(parse_reference("Categories(1"), Err(ReferenceError::Unbalanced(_))));
        assert!(matches!(parse_reference("Categories(1))"), Err(ReferenceError::Unbalanced(_))));
        assert!(matches!(parse_reference("Categories(1)x"), Err(ReferenceError::Unbalanced(_))));
        assert!(matches!(parse_reference("(1)"), Err(ReferenceError::MissingEntitySet(_))));
        assert!(matches!(parse_reference("Categories()"), Err(ReferenceError::EmptyKey(_))));
        assert!(matches!(parse_reference("Orders(1)/Customer"), Err(ReferenceError::MissingKey(_))));
    }

    #[test]
    fn format_round_trips() {
        for r in ["Categories(1)", "Orders(OrderID=1,Line='x')", "People('O''Neil')"] {
            let parsed = parse_reference(r).unwrap();
            let again = parse_reference(&format_reference(&parsed.entity_set, &parsed.key)).unwrap();
            assert_eq!(parsed, again);
            assert_eq!(parsed.to_string(), r);
        }
    }

    #[test]
    fn composite_keys() {
        assert_eq!(
            parse_composite_key("OrderID=1,Name='a,b'").unwrap(),
            vec![
                ("OrderID".to_owned(), "1".to_owned()),
                ("Name".to_owned(), "a,b".to_owned())
            ]
        );
        assert_eq!(
            parse_composite_key("K=\"x\"").unwrap(),
            vec![("K".to_owned(), "x".to_owned())]
        );
        assert_eq!(parse_composite_key("5"), Err(CompositeKeyError::NotComposite));
        assert_eq!(parse_composite_key("'a=b'"), Err(CompositeKeyError::NotComposite));
        assert!(matches!(parse_composite_key("A=1,2"), Err(CompositeKeyError::Malformed(_))));
        assert!(matches!(parse_composite_key("=1"), Err(CompositeKeyError::Malformed(_))));
    }

    #[test]
    fn raw_split_keeps_quotes() {
        assert_eq!(
            split_composite_key("Name='O''Neil'").unwrap(),
            vec![("Name".to_owned(), "'O''Neil'".to_owned())]
        );
    }
}
