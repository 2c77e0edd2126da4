//! In-memory evaluation of predicates, ordering and `$search` over rows.
//!
//! Semantics follow SQL: comparisons against a null column are unknown,
//! `eq null` / `ne null` test nullness, and only rows whose predicate is known
//! true pass. Nulls sort before every value.

use std::cmp::Ordering;

use odata_model::{CompareOperator, EntityDescriptor, Expr, OrderBy, PropertyDescriptor, PropertyKind, Row, SortDir, Value};

use crate::error::{StoreError, StoreResult};

/// Bring a filter literal to the kind of the property it is compared with.
///
/// # Errors
/// `StoreError::InvalidInput` when the literal cannot represent a value of `kind`.
pub fn coerce_literal(kind: PropertyKind, literal: &Value) -> StoreResult<Value> {
    let mismatch = || {
        StoreError::invalid(format!(
            "cannot compare {kind} with {} literal",
            literal.type_name()
        ))
    };
    Ok(match (kind, literal) {
        (_, Value::Null) => Value::Null,
        (PropertyKind::Int, Value::Int(_))
        | (PropertyKind::Decimal, Value::Decimal(_))
        | (PropertyKind::String, Value::String(_))
        | (PropertyKind::Bool, Value::Bool(_))
        | (PropertyKind::Uuid, Value::Uuid(_))
        | (PropertyKind::DateTime, Value::DateTime(_))
        | (PropertyKind::Date, Value::Date(_))
        | (PropertyKind::Time, Value::Time(_)) => literal.clone(),
        (PropertyKind::Decimal, Value::Int(i)) => Value::Decimal((*i).into()),
        (PropertyKind::Int, Value::Decimal(_)) => Value::Int(literal.as_i64().ok_or_else(mismatch)?),
        (PropertyKind::Complex | PropertyKind::Navigation, _) => return Err(mismatch()),
        (kind, Value::String(s)) => Value::parse_literal(kind, s).map_err(|_| mismatch())?,
        _ => return Err(mismatch()),
    })
}

fn resolve<'a>(entity: &'a EntityDescriptor, name: &str) -> StoreResult<&'a PropertyDescriptor> {
    let prop = entity
        .property(name)
        .ok_or_else(|| StoreError::invalid(format!("unknown property '{name}'")))?;
    if prop.is_navigation() {
        return Err(StoreError::invalid(format!(
            "navigation property '{name}' cannot be used in a predicate"
        )));
    }
    Ok(prop)
}

/// Whether `row` satisfies every predicate.
///
/// # Errors
/// `StoreError::InvalidInput` for unknown properties, unsupported functions or
/// literals of the wrong type.
pub fn matches_all(entity: &EntityDescriptor, predicates: &[Expr], row: &Row) -> StoreResult<bool> {
    for p in predicates {
        if eval(entity, p, row)? != Some(true) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Three-valued evaluation; `None` is SQL's unknown.
///
/// # Errors
/// Same as [`matches_all`].
pub fn eval(entity: &EntityDescriptor, expr: &Expr, row: &Row) -> StoreResult<Option<bool>> {
    Ok(match expr {
        Expr::And(a, b) => match (eval(entity, a, row)?, eval(entity, b, row)?) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Expr::Or(a, b) => match (eval(entity, a, row)?, eval(entity, b, row)?) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Expr::Not(x) => eval(entity, x, row)?.map(|b| !b),
        Expr::Compare(lhs, op, rhs) => {
            let (Expr::Identifier(name), Expr::Value(literal)) = (&**lhs, &**rhs) else {
                return Err(StoreError::invalid("unsupported comparison form"));
            };
            let prop = resolve(entity, name)?;
            let current = row.get_or_null(&prop.name);
            if literal.is_null() {
                return match op {
                    CompareOperator::Eq => Ok(Some(current.is_null())),
                    CompareOperator::Ne => Ok(Some(!current.is_null())),
                    _ => Err(StoreError::invalid(format!("operator '{}' with null", op.as_str()))),
                };
            }
            if current.is_null() {
                return Ok(None);
            }
            let literal = coerce_literal(prop.kind, literal)?;
            let ord = current
                .compare(&literal)
                .ok_or_else(|| StoreError::invalid(format!("'{name}' is not comparable")))?;
            Some(match op {
                CompareOperator::Eq => ord == Ordering::Equal,
                CompareOperator::Ne => ord != Ordering::Equal,
                CompareOperator::Gt => ord == Ordering::Greater,
                CompareOperator::Ge => ord != Ordering::Less,
                CompareOperator::Lt => ord == Ordering::Less,
                CompareOperator::Le => ord != Ordering::Greater,
            })
        }
        Expr::In(lhs, list) => {
            let Expr::Identifier(name) = &**lhs else {
                return Err(StoreError::invalid("left side of IN must be a field"));
            };
            let prop = resolve(entity, name)?;
            let current = row.get_or_null(&prop.name);
            if current.is_null() {
                return Ok(None);
            }
            let mut found = false;
            for item in list {
                let Expr::Value(v) = item else {
                    return Err(StoreError::invalid("IN() list supports only literals"));
                };
                if current.loosely_eq(&coerce_literal(prop.kind, v)?) {
                    found = true;
                }
            }
            Some(found)
        }
        Expr::Function(fname, args) => {
            let (Some(Expr::Identifier(name)), Some(Expr::Value(Value::String(needle)))) =
                (args.first(), args.get(1))
            else {
                return Err(StoreError::invalid(format!("unsupported function or args: {fname}()")));
            };
            if args.len() != 2 {
                return Err(StoreError::invalid(format!("unsupported function or args: {fname}()")));
            }
            let prop = resolve(entity, name)?;
            if prop.kind != PropertyKind::String {
                return Err(StoreError::invalid(format!("{fname}() needs a string property")));
            }
            let Some(haystack) = row.get_or_null(&prop.name).as_str() else {
                return Ok(None);
            };
            Some(match fname.to_ascii_lowercase().as_str() {
                "contains" => haystack.contains(needle.as_str()),
                "startswith" => haystack.starts_with(needle.as_str()),
                "endswith" => haystack.ends_with(needle.as_str()),
                _ => {
                    return Err(StoreError::invalid(format!("unsupported function or args: {fname}()")));
                }
            })
        }
        Expr::Identifier(name) => {
            let prop = resolve(entity, name)?;
            match row.get_or_null(&prop.name) {
                Value::Bool(b) => Some(*b),
                Value::Null => None,
                _ => return Err(StoreError::invalid(format!("bare identifier not allowed: {name}"))),
            }
        }
        Expr::Value(Value::Bool(b)) => Some(*b),
        Expr::Value(_) => return Err(StoreError::invalid("bare literal not allowed")),
    })
}

/// Order two rows by `order` (property names). Nulls first, descending reverses.
#[must_use]
pub fn compare_rows(order: &OrderBy, a: &Row, b: &Row) -> Ordering {
    for k in order.iter() {
        let ord = a
            .get_or_null(&k.field)
            .compare(b.get_or_null(&k.field))
            .unwrap_or(Ordering::Equal);
        let ord = match k.dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// String properties `$search` looks at: the searchable ones, or every string
/// property when none is marked.
#[must_use]
pub fn search_properties(entity: &EntityDescriptor) -> Vec<&PropertyDescriptor> {
    let strings: Vec<_> = entity
        .scalar_properties()
        .filter(|p| p.kind == PropertyKind::String)
        .collect();
    if strings.iter().any(|p| p.searchable) {
        strings.into_iter().filter(|p| p.searchable).collect()
    } else {
        strings
    }
}

/// Case-insensitive `$search` match over [`search_properties`].
#[must_use]
pub fn matches_search(entity: &EntityDescriptor, row: &Row, term: &str) -> bool {
    let term = term.trim().trim_matches('"').to_lowercase();
    if term.is_empty() {
        return true;
    }
    search_properties(entity).iter().any(|p| {
        row.get_or_null(&p.name)
            .as_str()
            .is_some_and(|s| s.to_lowercase().contains(&term))
    })
}
