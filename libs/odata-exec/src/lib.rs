//! Execution core of the OData service.
//!
//! [`Service`] ties a registry, a row store and an optional change tracker
//! together. Collection reads run through the staged [`pipeline`]; entity
//! mutations and `$ref` edits go through the [`controller`], which resolves
//! `@odata.bind` annotations with the [`binding`] resolver.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod binding;
pub mod config;
pub mod controller;
pub mod payload;
pub mod pipeline;
pub mod service;

pub use binding::{BindingResolver, PendingCollectionBinding, ResolvedBindings};
pub use config::{ConfigError, NullFkPolicy, ServiceConfig};
pub use controller::{EntityRequest, MutationResult, ReadOutcome, RefRequest, UpdateMode};
pub use pipeline::{CollectionRequest, CollectionResponse, CollectionStages, DefaultStages, Interrupt, ReadContext};
pub use service::Service;
