//! Predicate AST.
//!
//! `$filter` arrives already parsed into this shape; the execution core never
//! parses filter text. The same tree is used for predicates the core builds
//! itself (key lookups, skip-token resume conditions, hook scopes), so a store
//! only has to understand one predicate language.

use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, CompareOperator, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    Function(String, Vec<Expr>),
    Identifier(String),
    Value(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOperator {
    /// The `$filter` keyword of the operator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOperator::Eq => "eq",
            CompareOperator::Ne => "ne",
            CompareOperator::Gt => "gt",
            CompareOperator::Ge => "ge",
            CompareOperator::Lt => "lt",
            CompareOperator::Le => "le",
        }
    }
}

impl Expr {
    /// Combine two expressions with AND: `expr1 and expr2`
    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    /// Combine two expressions with OR: `expr1 or expr2`
    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// Negate an expression: `not expr`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        !self
    }

    /// `field op value`
    #[must_use]
    pub fn compare(field: impl Into<String>, op: CompareOperator, value: Value) -> Expr {
        Expr::Compare(
            Box::new(Expr::Identifier(field.into())),
            op,
            Box::new(Expr::Value(value)),
        )
    }

    /// `field eq value`
    #[must_use]
    pub fn eq(field: impl Into<String>, value: Value) -> Expr {
        Self::compare(field, CompareOperator::Eq, value)
    }

    /// Fold a list of predicates with AND; `None` for an empty list.
    #[must_use]
    pub fn all<I: IntoIterator<Item = Expr>>(items: I) -> Option<Expr> {
        items.into_iter().reduce(Expr::and)
    }

    /// Fold a list of predicates with OR; `None` for an empty list.
    #[must_use]
    pub fn any<I: IntoIterator<Item = Expr>>(items: I) -> Option<Expr> {
        items.into_iter().reduce(Expr::or)
    }

    /// Every identifier referenced anywhere in the tree.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Compare(a, _, b) => {
                a.collect_identifiers(out);
                b.collect_identifiers(out);
            }
            Expr::Not(x) => x.collect_identifiers(out),
            Expr::In(x, list) => {
                x.collect_identifiers(out);
                for item in list {
                    item.collect_identifiers(out);
                }
            }
            Expr::Function(_, args) => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
            Expr::Identifier(name) => out.push(name),
            Expr::Value(_) => {}
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Self::Output {
        Expr::Not(Box::new(self))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn fold_helpers() {
        assert!(Expr::all(Vec::new()).is_none());
        let e = Expr::all([Expr::eq("A", Value::Int(1)), Expr::eq("B", Value::Int(2))]).unwrap();
        assert!(matches!(e, Expr::And(_, _)));
        let e = Expr::any([Expr::eq("A", Value::Int(1))]).unwrap();
        assert!(matches!(e, Expr::Compare(_, CompareOperator::Eq, _)));
    }

    #[test]
    fn identifiers_are_collected_depth_first() {
        let e = Expr::eq("Name", Value::from("x"))
            .or(Expr::In(
                Box::new(Expr::Identifier("ID".into())),
                vec![Expr::Value(Value::Int(1))],
            ))
            .not();
        assert_eq!(e.identifiers(), vec!["Name", "ID"]);
    }
}
