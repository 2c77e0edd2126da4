//! In-memory row store.
//!
//! Transactions are serializable: a transaction holds the store lock from
//! `begin` to `commit`/`rollback` and works on a private copy of the state,
//! which replaces the shared state on commit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use odata_model::{EntityDescriptor, KeyValues, PropertyDescriptor, PropertyKind, Row, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::eval::{compare_rows, matches_all, matches_search};
use crate::store::{Association, Capabilities, FindQuery, RowStore, Source, StoreTx};

#[derive(Clone, Debug, Default)]
struct State {
    /// entity set -> rows
    tables: HashMap<String, Vec<Row>>,
    /// (owner set, navigation, target set) -> (owner key, target key) edges
    links: HashMap<(String, String, String), Vec<(KeyValues, KeyValues)>>,
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    capabilities: Capabilities,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            capabilities: Capabilities {
                search: true,
                select: false,
            },
        }
    }

    /// Report no native `$search`, so callers search in memory.
    #[must_use]
    pub fn without_search(mut self) -> Self {
        self.capabilities.search = false;
        self
    }

    /// Insert rows directly, outside any transaction.
    pub async fn seed(&self, entity: &EntityDescriptor, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.state.lock().await;
        state
            .tables
            .entry(entity.entity_set.clone())
            .or_default()
            .extend(rows);
    }

    /// Snapshot of every row of an entity set, in insertion order.
    pub async fn rows(&self, entity_set: &str) -> Vec<Row> {
        self.state
            .lock()
            .await
            .tables
            .get(entity_set)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        debug!("memory transaction started");
        Ok(Box::new(MemoryTx {
            guard,
            working,
            search: self.capabilities.search,
        }))
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    search: bool,
}

/// Values the dependent properties `deps` of `entity` take once unlinked.
fn unlinked<'d>(
    entity: &EntityDescriptor,
    deps: impl Iterator<Item = &'d String>,
) -> StoreResult<Vec<(String, Value)>> {
    deps.map(|dep| {
        entity
            .property(dep)
            .and_then(PropertyDescriptor::unlinked_value)
            .map(|v| (dep.clone(), v))
            .ok_or_else(|| StoreError::invalid(format!("'{dep}' cannot be unlinked")))
    })
    .collect()
}

fn describe(entity: &EntityDescriptor, key: &KeyValues) -> String {
    format!("{}({})", entity.entity_set, key.to_key_string(entity))
}

impl MemoryTx {
    fn table(&self, entity: &EntityDescriptor) -> &[Row] {
        self.working
            .tables
            .get(&entity.entity_set)
            .map_or(&[][..], Vec::as_slice)
    }

    fn table_mut(&mut self, entity: &EntityDescriptor) -> &mut Vec<Row> {
        self.working
            .tables
            .entry(entity.entity_set.clone())
            .or_default()
    }

    fn get(&self, entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<&Row> {
        self.table(entity)
            .iter()
            .find(|r| key.matches(r))
            .ok_or_else(|| StoreError::NotFound(describe(entity, key)))
    }

    fn get_mut(&mut self, entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<&mut Row> {
        let what = describe(entity, key);
        self.table_mut(entity)
            .iter_mut()
            .find(|r| key.matches(r))
            .ok_or(StoreError::NotFound(what))
    }

    fn link_key(association: &Association<'_>) -> (String, String, String) {
        (
            association.owner.entity_set.clone(),
            association.property.name.clone(),
            association.target.entity_set.clone(),
        )
    }

    /// Candidate rows of the query source, before predicates.
    fn source_rows(&self, query: &FindQuery<'_>) -> StoreResult<Vec<Row>> {
        let Source::Navigation {
            association,
            owner_key,
        } = &query.source
        else {
            return Ok(self.table(query.entity).to_vec());
        };

        let owner = self.get(association.owner, owner_key)?;
        let nav = association.navigation;
        let targets = self.table(association.target);

        let related: Vec<Row> = if !nav.referential_constraints.is_empty() {
            // foreign key on the owner
            if nav
                .referential_constraints
                .keys()
                .any(|dep| owner.get_or_null(dep).is_null())
            {
                return Ok(Vec::new());
            }
            targets
                .iter()
                .filter(|t| {
                    nav.referential_constraints
                        .iter()
                        .all(|(dep, principal)| t.get_or_null(principal).loosely_eq(owner.get_or_null(dep)))
                })
                .cloned()
                .collect()
        } else if !nav.inverse_constraints.is_empty() {
            // foreign key on the targets
            targets
                .iter()
                .filter(|t| {
                    nav.inverse_constraints.iter().all(|(dep, principal)| {
                        let fk = t.get_or_null(dep);
                        !fk.is_null() && fk.loosely_eq(owner.get_or_null(principal))
                    })
                })
                .cloned()
                .collect()
        } else {
            let edges = self
                .working
                .links
                .get(&Self::link_key(association))
                .map_or(&[][..], Vec::as_slice);
            edges
                .iter()
                .filter(|(o, _)| o == owner_key)
                .filter_map(|(_, t)| targets.iter().find(|r| t.matches(r)).cloned())
                .collect()
        };
        Ok(related)
    }

    fn filtered(&self, query: &FindQuery<'_>) -> StoreResult<Vec<Row>> {
        if query.apply.is_some() || query.compute.is_some() {
            return Err(StoreError::Unsupported("$apply/$compute".into()));
        }
        let mut out = Vec::new();
        for row in self.source_rows(query)? {
            if !matches_all(query.entity, &query.predicates, &row)? {
                continue;
            }
            if let Some(term) = &query.search {
                if !self.search {
                    return Err(StoreError::Unsupported("$search".into()));
                }
                if !matches_search(query.entity, &row, term) {
                    continue;
                }
            }
            out.push(row);
        }
        Ok(out)
    }

    fn assign_generated_keys(&self, entity: &EntityDescriptor, row: &mut Row) -> StoreResult<()> {
        for key in entity.key_properties() {
            if !row.get_or_null(&key.name).is_null() {
                continue;
            }
            if !key.generated {
                return Err(StoreError::invalid(format!("missing key property '{}'", key.name)));
            }
            let generated = match key.kind {
                PropertyKind::Int => {
                    let max = self
                        .table(entity)
                        .iter()
                        .filter_map(|r| r.get_or_null(&key.name).as_i64())
                        .max()
                        .unwrap_or(0);
                    let next = max.checked_add(1).ok_or_else(|| {
                        StoreError::Conflict(format!("'{}' has no generated key left", entity.entity_set))
                    })?;
                    Value::Int(next)
                }
                PropertyKind::Uuid => Value::Uuid(uuid::Uuid::new_v4()),
                other => {
                    return Err(StoreError::Unsupported(format!("generated {other} keys")));
                }
            };
            row.set(key.name.clone(), generated);
        }
        Ok(())
    }

    fn set_fk(row: &mut Row, pairs: impl Iterator<Item = (String, Value)>) {
        for (field, value) in pairs {
            row.set(field, value);
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find(&mut self, query: &FindQuery<'_>) -> StoreResult<Vec<Row>> {
        let mut rows = self.filtered(query)?;
        if !query.order.is_empty() {
            rows.sort_by(|a, b| compare_rows(&query.order, a, b));
        }
        let skip = usize::try_from(query.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let top = query
            .top
            .map_or(usize::MAX, |t| usize::try_from(t).unwrap_or(usize::MAX));
        Ok(rows.into_iter().skip(skip).take(top).collect())
    }

    async fn count(&mut self, query: &FindQuery<'_>) -> StoreResult<u64> {
        let n = self.filtered(query)?.len();
        Ok(u64::try_from(n).unwrap_or(u64::MAX))
    }

    async fn create(&mut self, entity: &EntityDescriptor, row: &Row) -> StoreResult<Row> {
        let mut stored = row.clone();
        self.assign_generated_keys(entity, &mut stored)?;
        let key = KeyValues::from_row(entity, &stored).map_err(|e| StoreError::invalid(e.to_string()))?;
        if self.get(entity, &key).is_ok() {
            return Err(StoreError::Conflict(format!(
                "{} already exists",
                describe(entity, &key)
            )));
        }
        for prop in entity.scalar_properties() {
            if !stored.contains(&prop.name) {
                stored.set(prop.name.clone(), Value::Null);
            }
        }
        self.table_mut(entity).push(stored.clone());
        Ok(stored)
    }

    async fn update(&mut self, entity: &EntityDescriptor, key: &KeyValues, changes: &Row) -> StoreResult<Row> {
        let row = self.get_mut(entity, key)?;
        row.merge(changes);
        Ok(row.clone())
    }

    async fn delete(&mut self, entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<()> {
        let table = self.table_mut(entity);
        let before = table.len();
        table.retain(|r| !key.matches(r));
        if table.len() == before {
            return Err(StoreError::NotFound(describe(entity, key)));
        }
        let set = &entity.entity_set;
        for ((owner_set, _, target_set), edges) in &mut self.working.links {
            if owner_set == set {
                edges.retain(|(o, _)| o != key);
            }
            if target_set == set {
                edges.retain(|(_, t)| t != key);
            }
        }
        Ok(())
    }

    async fn append_association(
        &mut self,
        association: &Association<'_>,
        owner: &KeyValues,
        target: &KeyValues,
    ) -> StoreResult<()> {
        let nav = association.navigation;
        let owner_row = self.get(association.owner, owner)?.clone();
        let target_row = self.get(association.target, target)?.clone();

        if !nav.referential_constraints.is_empty() {
            let fk: Vec<_> = nav
                .referential_constraints
                .iter()
                .map(|(dep, principal)| (dep.clone(), target_row.get_or_null(principal).clone()))
                .collect();
            Self::set_fk(self.get_mut(association.owner, owner)?, fk.into_iter());
        } else if !nav.inverse_constraints.is_empty() {
            let fk: Vec<_> = nav
                .inverse_constraints
                .iter()
                .map(|(dep, principal)| (dep.clone(), owner_row.get_or_null(principal).clone()))
                .collect();
            Self::set_fk(self.get_mut(association.target, target)?, fk.into_iter());
        } else {
            let edges = self
                .working
                .links
                .entry(Self::link_key(association))
                .or_default();
            if !edges.iter().any(|(o, t)| o == owner && t == target) {
                edges.push((owner.clone(), target.clone()));
            }
        }
        Ok(())
    }

    async fn replace_associations(
        &mut self,
        association: &Association<'_>,
        owner: &KeyValues,
        targets: &[KeyValues],
    ) -> StoreResult<()> {
        let nav = association.navigation;
        self.get(association.owner, owner)?;
        for t in targets {
            self.get(association.target, t)?;
        }

        if !nav.referential_constraints.is_empty() {
            return match targets {
                [] => {
                    let cleared = unlinked(association.owner, nav.referential_constraints.keys())?;
                    Self::set_fk(self.get_mut(association.owner, owner)?, cleared.into_iter());
                    Ok(())
                }
                [only] => self.append_association(association, owner, only).await,
                _ => Err(StoreError::invalid(format!(
                    "'{}' is single-valued",
                    association.property.name
                ))),
            };
        }

        if !nav.inverse_constraints.is_empty() {
            let owner_row = self.get(association.owner, owner)?.clone();
            let target_entity = association.target;
            let cleared = unlinked(target_entity, nav.inverse_constraints.keys())?;
            for row in self.table_mut(target_entity).iter_mut() {
                let linked = nav.inverse_constraints.iter().all(|(dep, principal)| {
                    let fk = row.get_or_null(dep);
                    !fk.is_null() && fk.loosely_eq(owner_row.get_or_null(principal))
                });
                let wanted = targets.iter().any(|t| t.matches(row));
                if wanted {
                    for (dep, principal) in &nav.inverse_constraints {
                        row.set(dep.clone(), owner_row.get_or_null(principal).clone());
                    }
                } else if linked {
                    for (dep, value) in &cleared {
                        row.set(dep.clone(), value.clone());
                    }
                }
            }
            return Ok(());
        }

        let edges = self
            .working
            .links
            .entry(Self::link_key(association))
            .or_default();
        edges.retain(|(o, _)| o != owner);
        for t in targets {
            if !edges.iter().any(|(o, existing)| o == owner && existing == t) {
                edges.push((owner.clone(), t.clone()));
            }
        }
        Ok(())
    }

    async fn remove_association(
        &mut self,
        association: &Association<'_>,
        owner: &KeyValues,
        target: &KeyValues,
    ) -> StoreResult<()> {
        let nav = association.navigation;
        let owner_row = self.get(association.owner, owner)?.clone();
        let missing = || {
            StoreError::NotFound(format!(
                "link {}/{} -> {}",
                describe(association.owner, owner),
                association.property.name,
                describe(association.target, target)
            ))
        };

        if !nav.referential_constraints.is_empty() {
            let target_row = self.get(association.target, target).map_err(|_| missing())?;
            let linked = nav
                .referential_constraints
                .iter()
                .all(|(dep, principal)| owner_row.get_or_null(dep).loosely_eq(target_row.get_or_null(principal)));
            if !linked {
                return Err(missing());
            }
            let owner_row = self.get_mut(association.owner, owner)?;
            for dep in nav.referential_constraints.keys() {
                owner_row.set(dep.clone(), Value::Null);
            }
        } else if !nav.inverse_constraints.is_empty() {
            let target_row = self.get_mut(association.target, target).map_err(|_| missing())?;
            let linked = nav.inverse_constraints.iter().all(|(dep, principal)| {
                let fk = target_row.get_or_null(dep);
                !fk.is_null() && fk.loosely_eq(owner_row.get_or_null(principal))
            });
            if !linked {
                return Err(missing());
            }
            for dep in nav.inverse_constraints.keys() {
                target_row.set(dep.clone(), Value::Null);
            }
        } else {
            let edges = self
                .working
                .links
                .entry(Self::link_key(association))
                .or_default();
            let before = edges.len();
            edges.retain(|(o, t)| !(o == owner && t == target));
            if edges.len() == before {
                return Err(missing());
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        debug!("memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        debug!("memory transaction rolled back");
        Ok(())
    }
}
