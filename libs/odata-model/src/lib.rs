//! Entity model of the OData execution core.
//!
//! Descriptors and the registry describe entity types; [`Value`] and [`Row`]
//! carry data; the reference, key and skip-token codecs translate between wire
//! text and typed values; [`Error`] is the taxonomy every other crate reports.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod ast;
pub mod descriptor;
pub mod errors;
pub mod etag;
pub mod hooks;
pub mod key;
pub mod kind;
pub mod limits;
pub mod problem_mapping;
pub mod query;
pub mod reference;
pub mod registry;
pub mod row;
pub mod skiptoken;
pub mod value;

pub use ast::{CompareOperator, Expr};
pub use descriptor::{EntityDescriptor, NavigationDescriptor, PropertyDescriptor};
pub use errors::{Error, ErrorKind};
pub use hooks::{EntityHooks, HookRejection, HookResult, RequestContext};
pub use key::{KeyError, KeyValues};
pub use kind::PropertyKind;
pub use limits::ODataLimits;
pub use query::{OrderBy, OrderKey, QueryOptions, SortDir};
pub use reference::{EntityRef, format_reference, parse_composite_key, parse_reference};
pub use registry::{Registry, RegistryBuilder, RegistryError};
pub use row::Row;
pub use skiptoken::{SkipToken, effective_order};
pub use value::{Value, ValueError};
