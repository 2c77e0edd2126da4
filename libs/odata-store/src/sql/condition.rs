//! Predicate AST → `sea_orm::Condition` compiler.
//!
//! Identifiers resolve through the entity descriptor (property or wire name)
//! to columns named after the property.

use bigdecimal::BigDecimal;
use odata_model::{CompareOperator, EntityDescriptor, Expr as X, PropertyDescriptor, PropertyKind, Value};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Alias, Condition, Expr, LikeExpr, SimpleExpr};

use crate::error::{StoreError, StoreResult};
use crate::eval::{coerce_literal, search_properties};

/* ---------- value conversion ---------- */

fn bigdecimal_to_decimal(bd: &BigDecimal) -> StoreResult<Decimal> {
    // preserve precision via string
    let s = bd.normalized().to_string();
    Decimal::from_str_exact(&s)
        .or_else(|_| s.parse::<Decimal>())
        .map_err(|_| StoreError::invalid(format!("decimal {s} out of range")))
}

/// Typed SQL value for a property of `kind`. Nulls stay typed.
///
/// # Errors
/// `StoreError::InvalidInput` when `v` does not fit `kind`.
pub fn to_sea_value(kind: PropertyKind, v: &Value) -> StoreResult<sea_orm::Value> {
    use sea_orm::Value as S;

    let v = if matches!(kind, PropertyKind::Complex) {
        v.clone()
    } else {
        coerce_literal(kind, v)?
    };
    Ok(match (kind, v) {
        (PropertyKind::String, Value::String(s)) => S::String(Some(Box::new(s))),
        (PropertyKind::String, _) => S::String(None),
        (PropertyKind::Int, Value::Int(i)) => S::BigInt(Some(i)),
        (PropertyKind::Int, _) => S::BigInt(None),
        (PropertyKind::Decimal, Value::Decimal(d)) => {
            S::Decimal(Some(Box::new(bigdecimal_to_decimal(&d)?)))
        }
        (PropertyKind::Decimal, _) => S::Decimal(None),
        (PropertyKind::Bool, Value::Bool(b)) => S::Bool(Some(b)),
        (PropertyKind::Bool, _) => S::Bool(None),
        (PropertyKind::Uuid, Value::Uuid(u)) => S::Uuid(Some(Box::new(u))),
        (PropertyKind::Uuid, _) => S::Uuid(None),
        (PropertyKind::DateTime, Value::DateTime(dt)) => S::ChronoDateTimeUtc(Some(Box::new(dt))),
        (PropertyKind::DateTime, _) => S::ChronoDateTimeUtc(None),
        (PropertyKind::Date, Value::Date(d)) => S::ChronoDate(Some(Box::new(d))),
        (PropertyKind::Date, _) => S::ChronoDate(None),
        (PropertyKind::Time, Value::Time(t)) => S::ChronoTime(Some(Box::new(t))),
        (PropertyKind::Time, _) => S::ChronoTime(None),
        // complex content is stored as JSON text
        (PropertyKind::Complex, Value::Null) => S::String(None),
        (PropertyKind::Complex, other) => S::String(Some(Box::new(other.to_json().to_string()))),
        (PropertyKind::Navigation, _) => {
            return Err(StoreError::invalid("navigation properties have no column"));
        }
    })
}

/* ---------- LIKE helpers ---------- */

fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}

fn like(pattern: String) -> LikeExpr {
    LikeExpr::new(pattern).escape('\\')
}

/* ---------- resolution ---------- */

pub(super) fn column(prop: &PropertyDescriptor) -> Alias {
    Alias::new(prop.name.as_str())
}

fn resolve<'a>(entity: &'a EntityDescriptor, name: &str) -> StoreResult<&'a PropertyDescriptor> {
    let prop = entity
        .property(name)
        .ok_or_else(|| StoreError::invalid(format!("unknown property '{name}'")))?;
    if prop.is_navigation() || prop.is_complex() {
        return Err(StoreError::invalid(format!(
            "'{name}' cannot be used in a predicate"
        )));
    }
    Ok(prop)
}

fn always(b: bool) -> SimpleExpr {
    Expr::cust(if b { "1=1" } else { "1=0" })
}

/* ---------- Expr (AST) -> Condition ---------- */

/// # Errors
/// `StoreError::InvalidInput` if the expression references unknown properties,
/// uses unsupported functions or carries literals of the wrong type.
pub fn expr_to_condition(entity: &EntityDescriptor, expr: &X) -> StoreResult<Condition> {
    use CompareOperator as Op;

    Ok(match expr {
        X::And(a, b) => Condition::all()
            .add(expr_to_condition(entity, a)?)
            .add(expr_to_condition(entity, b)?),
        X::Or(a, b) => Condition::any()
            .add(expr_to_condition(entity, a)?)
            .add(expr_to_condition(entity, b)?),
        X::Not(x) => Condition::all().add(expr_to_condition(entity, x)?).not(),

        // Identifier op Value
        X::Compare(lhs, op, rhs) => {
            let (X::Identifier(name), X::Value(val)) = (&**lhs, &**rhs) else {
                return Err(StoreError::invalid("unsupported comparison form"));
            };
            let prop = resolve(entity, name)?;
            let col = column(prop);

            // null handling
            if val.is_null() {
                return Ok(match op {
                    Op::Eq => Condition::all().add(Expr::col(col).is_null()),
                    Op::Ne => Condition::all().add(Expr::col(col).is_not_null()),
                    _ => return Err(StoreError::invalid(format!("operator '{}' with null", op.as_str()))),
                });
            }

            let value = to_sea_value(prop.kind, val)?;
            let e = match op {
                Op::Eq => Expr::col(col).eq(value),
                Op::Ne => Expr::col(col).ne(value),
                Op::Gt => Expr::col(col).gt(value),
                Op::Ge => Expr::col(col).gte(value),
                Op::Lt => Expr::col(col).lt(value),
                Op::Le => Expr::col(col).lte(value),
            };
            Condition::all().add(e)
        }

        // Identifier IN (value, value, ...)
        X::In(l, list) => {
            let X::Identifier(name) = &**l else {
                return Err(StoreError::invalid("left side of IN must be a field"));
            };
            let prop = resolve(entity, name)?;
            let vals = list
                .iter()
                .map(|e| match e {
                    X::Value(v) => to_sea_value(prop.kind, v),
                    _ => Err(StoreError::invalid("IN() list supports only literals")),
                })
                .collect::<StoreResult<Vec<_>>>()?;
            if vals.is_empty() {
                Condition::all().add(always(false))
            } else {
                Condition::all().add(Expr::col(column(prop)).is_in(vals))
            }
        }

        // contains/startswith/endswith
        X::Function(fname, args) => {
            let [X::Identifier(name), X::Value(Value::String(s))] = args.as_slice() else {
                return Err(StoreError::invalid(format!("unsupported function or args: {fname}()")));
            };
            let prop = resolve(entity, name)?;
            if prop.kind != PropertyKind::String {
                return Err(StoreError::invalid(format!("{fname}() needs a string property")));
            }
            let pattern = match fname.to_ascii_lowercase().as_str() {
                "contains" => format!("%{}%", like_escape(s)),
                "startswith" => format!("{}%", like_escape(s)),
                "endswith" => format!("%{}", like_escape(s)),
                _ => {
                    return Err(StoreError::invalid(format!("unsupported function or args: {fname}()")));
                }
            };
            Condition::all().add(Expr::col(column(prop)).like(like(pattern)))
        }

        X::Identifier(name) => {
            let prop = resolve(entity, name)?;
            if prop.kind != PropertyKind::Bool {
                return Err(StoreError::invalid(format!("bare identifier not allowed: {name}")));
            }
            Condition::all().add(Expr::col(column(prop)).eq(true))
        }
        X::Value(Value::Bool(b)) => Condition::all().add(always(*b)),
        X::Value(_) => return Err(StoreError::invalid("bare literal not allowed")),
    })
}

/// `$search` as an OR of LIKE matches over the searchable string columns.
#[must_use]
pub fn search_condition(entity: &EntityDescriptor, term: &str) -> Condition {
    let term = term.trim().trim_matches('"');
    if term.is_empty() {
        return Condition::all();
    }
    let pattern = format!("%{}%", like_escape(term));
    let props = search_properties(entity);
    if props.is_empty() {
        return Condition::all().add(always(false));
    }
    props.into_iter().fold(Condition::any(), |cond, p| {
        cond.add(Expr::col(column(p)).like(like(pattern.clone())))
    })
}
