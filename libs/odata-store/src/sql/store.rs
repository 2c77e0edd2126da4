//! `RowStore` over a SeaORM connection.
//!
//! Entities map to tables named by `EntityDescriptor::table_name`, one column
//! per scalar property. Association-table navigations use the link tables
//! created by [`super::create_schema`].

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use odata_model::{EntityDescriptor, KeyValues, PropertyDescriptor, PropertyKind, Registry, Row, SortDir, Value};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Alias, Condition, Expr, NullOrdering, Order, Query, SimpleExpr};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, QueryResult, StatementBuilder,
    TransactionTrait,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::condition::{column, expr_to_condition, search_condition, to_sea_value};
use super::schema::{auto_increment_key, create_schema, link_column};
use crate::error::{StoreError, StoreResult};
use crate::store::{Association, Capabilities, FindQuery, RowStore, Source, StoreTx};

/// SQL-backed store. Holds the registry to clean up link rows on delete.
#[derive(Clone)]
pub struct SqlStore {
    db: DatabaseConnection,
    registry: Arc<Registry>,
}

impl SqlStore {
    #[must_use]
    pub fn new(db: DatabaseConnection, registry: Arc<Registry>) -> Self {
        Self { db, registry }
    }

    /// # Errors
    /// `StoreError::Backend` when the connection cannot be established.
    pub async fn connect(options: impl Into<ConnectOptions>, registry: Arc<Registry>) -> StoreResult<Self> {
        let db = Database::connect(options).await?;
        Ok(Self::new(db, registry))
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create the tables of every registered entity set.
    ///
    /// # Errors
    /// `StoreError::Backend` when a DDL statement fails.
    pub async fn create_schema(&self) -> StoreResult<()> {
        create_schema(&self.db, &self.registry).await
    }
}

#[async_trait]
impl RowStore for SqlStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let txn = self.db.begin().await?;
        debug!("sql transaction started");
        Ok(Box::new(SqlTx {
            txn,
            registry: Arc::clone(&self.registry),
        }))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            select: true,
        }
    }
}

pub struct SqlTx {
    txn: DatabaseTransaction,
    registry: Arc<Registry>,
}

/* ---------- helpers ---------- */

fn describe(entity: &EntityDescriptor, key: &KeyValues) -> String {
    format!("{}({})", entity.entity_set, key.to_key_string(entity))
}

fn table(entity: &EntityDescriptor) -> Alias {
    Alias::new(entity.table_name())
}

fn property<'a>(entity: &'a EntityDescriptor, name: &str) -> StoreResult<&'a PropertyDescriptor> {
    entity
        .property(name)
        .filter(|p| !p.is_navigation())
        .ok_or_else(|| StoreError::invalid(format!("unknown property '{name}' of {}", entity.entity_name)))
}

fn column_eq(entity: &EntityDescriptor, name: &str, value: &Value) -> StoreResult<SimpleExpr> {
    let prop = property(entity, name)?;
    Ok(Expr::col(column(prop)).eq(to_sea_value(prop.kind, value)?))
}

fn key_condition(entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<Condition> {
    key.iter()
        .try_fold(Condition::all(), |cond, (name, value)| Ok(cond.add(column_eq(entity, name, value)?)))
}

fn link_condition(side: &str, entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<Condition> {
    key.iter().try_fold(Condition::all(), |cond, (name, value)| {
        let prop = property(entity, name)?;
        let col = Alias::new(link_column(side, prop).as_str());
        Ok(cond.add(Expr::col(col).eq(to_sea_value(prop.kind, value)?)))
    })
}

fn decode_value(prop: &PropertyDescriptor, col: &str, res: &QueryResult) -> StoreResult<Value> {
    Ok(match prop.kind {
        PropertyKind::String => res.try_get::<Option<String>>("", col)?.map_or(Value::Null, Value::String),
        PropertyKind::Int => res.try_get::<Option<i64>>("", col)?.map_or(Value::Null, Value::Int),
        PropertyKind::Decimal => match res.try_get::<Option<Decimal>>("", col)? {
            None => Value::Null,
            Some(d) => Value::Decimal(
                BigDecimal::from_str(&d.to_string()).map_err(|e| StoreError::backend(e.to_string()))?,
            ),
        },
        PropertyKind::Bool => res.try_get::<Option<bool>>("", col)?.map_or(Value::Null, Value::Bool),
        PropertyKind::Uuid => res.try_get::<Option<Uuid>>("", col)?.map_or(Value::Null, Value::Uuid),
        PropertyKind::DateTime => res
            .try_get::<Option<DateTime<Utc>>>("", col)?
            .map_or(Value::Null, Value::DateTime),
        PropertyKind::Date => res.try_get::<Option<NaiveDate>>("", col)?.map_or(Value::Null, Value::Date),
        PropertyKind::Time => res.try_get::<Option<NaiveTime>>("", col)?.map_or(Value::Null, Value::Time),
        PropertyKind::Complex => match res.try_get::<Option<String>>("", col)? {
            None => Value::Null,
            Some(text) => Value::Complex(
                serde_json::from_str(&text).map_err(|e| StoreError::backend(format!("{col}: {e}")))?,
            ),
        },
        PropertyKind::Navigation => Value::Null,
    })
}

fn decode_row(columns: &[&PropertyDescriptor], res: &QueryResult) -> StoreResult<Row> {
    columns
        .iter()
        .map(|p| Ok((p.name.clone(), decode_value(p, &p.name, res)?)))
        .collect()
}

/// Projected columns: all scalars, or keys + order columns + `$select`.
fn select_columns<'e>(query: &FindQuery<'e>) -> Vec<&'e PropertyDescriptor> {
    let entity = query.entity;
    match &query.select {
        None => entity.scalar_properties().collect(),
        Some(fields) => entity
            .scalar_properties()
            .filter(|p| {
                p.is_key
                    || query.order.iter().any(|k| p.answers_to(&k.field))
                    || fields.iter().any(|f| p.answers_to(f))
            })
            .collect(),
    }
}

fn ensure_plain(query: &FindQuery<'_>) -> StoreResult<()> {
    if query.apply.is_some() || query.compute.is_some() {
        return Err(StoreError::Unsupported("$apply/$compute".into()));
    }
    Ok(())
}

impl SqlTx {
    async fn exec(&self, stmt: &impl StatementBuilder) -> StoreResult<u64> {
        let backend = self.txn.get_database_backend();
        let res = self.txn.execute(backend.build(stmt)).await?;
        Ok(res.rows_affected())
    }

    async fn fetch(&self, entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<Row> {
        let columns: Vec<_> = entity.scalar_properties().collect();
        let mut stmt = Query::select();
        stmt.from(table(entity))
            .columns(columns.iter().map(|p| column(p)))
            .cond_where(key_condition(entity, key)?);
        let backend = self.txn.get_database_backend();
        let res = self
            .txn
            .query_one(backend.build(&stmt))
            .await?
            .ok_or_else(|| StoreError::NotFound(describe(entity, key)))?;
        decode_row(&columns, &res)
    }

    async fn update_where(
        &self,
        entity: &EntityDescriptor,
        assignments: Vec<(Alias, SimpleExpr)>,
        cond: Condition,
    ) -> StoreResult<u64> {
        if assignments.is_empty() {
            return Ok(0);
        }
        let mut stmt = Query::update();
        stmt.table(table(entity)).values(assignments).cond_where(cond);
        self.exec(&stmt).await
    }

    /// `dep <- source[principal]` for each constraint pair, typed by `entity`'s dependents.
    fn fk_assignments<'c>(
        entity: &EntityDescriptor,
        pairs: impl Iterator<Item = (&'c String, &'c String)>,
        source: Option<&Row>,
    ) -> StoreResult<Vec<(Alias, SimpleExpr)>> {
        pairs
            .map(|(dep, principal)| {
                let prop = property(entity, dep)?;
                let value = match source {
                    Some(row) => row.get_or_null(principal).clone(),
                    None => prop
                        .unlinked_value()
                        .ok_or_else(|| StoreError::invalid(format!("'{dep}' cannot be unlinked")))?,
                };
                Ok((column(prop), SimpleExpr::from(to_sea_value(prop.kind, &value)?)))
            })
            .collect()
    }

    async fn linked_keys(&self, association: &Association<'_>, owner: &KeyValues) -> StoreResult<Vec<KeyValues>> {
        let target = association.target;
        let keys: Vec<_> = target.key_properties().collect();
        let mut stmt = Query::select();
        stmt.from(Alias::new(association.link_table().as_str()))
            .columns(keys.iter().map(|k| Alias::new(link_column("target", k).as_str())))
            .cond_where(link_condition("owner", association.owner, owner)?);
        let backend = self.txn.get_database_backend();
        let rows = self.txn.query_all(backend.build(&stmt)).await?;
        rows.iter()
            .map(|res| {
                let row = keys
                    .iter()
                    .map(|k| Ok((k.name.clone(), decode_value(k, &link_column("target", k), res)?)))
                    .collect::<StoreResult<Row>>()?;
                KeyValues::from_row(target, &row).map_err(|e| StoreError::backend(e.to_string()))
            })
            .collect()
    }

    async fn insert_link(&self, association: &Association<'_>, owner: &KeyValues, target: &KeyValues) -> StoreResult<()> {
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for (side, entity, key) in [("owner", association.owner, owner), ("target", association.target, target)] {
            for (name, value) in key.iter() {
                let prop = property(entity, name)?;
                cols.push(Alias::new(link_column(side, prop).as_str()));
                vals.push(SimpleExpr::from(to_sea_value(prop.kind, value)?));
            }
        }
        let mut stmt = Query::insert();
        stmt.into_table(Alias::new(association.link_table().as_str()))
            .columns(cols)
            .values(vals)
            .map_err(|e| StoreError::backend(e.to_string()))?;
        self.exec(&stmt).await?;
        Ok(())
    }

    /// Condition restricting the query's entity to its source; `None` when
    /// the source is known to be empty.
    async fn source_condition(&self, query: &FindQuery<'_>) -> StoreResult<Option<Condition>> {
        let Source::Navigation {
            association,
            owner_key,
        } = &query.source
        else {
            return Ok(Some(Condition::all()));
        };

        let owner = self.fetch(association.owner, owner_key).await?;
        let nav = association.navigation;
        let target = association.target;

        if !nav.referential_constraints.is_empty() {
            // foreign key on the owner
            let mut cond = Condition::all();
            for (dep, principal) in &nav.referential_constraints {
                let fk = owner.get_or_null(dep);
                if fk.is_null() {
                    return Ok(None);
                }
                cond = cond.add(column_eq(target, principal, fk)?);
            }
            return Ok(Some(cond));
        }

        if !nav.inverse_constraints.is_empty() {
            // foreign key on the targets
            let mut cond = Condition::all();
            for (dep, principal) in &nav.inverse_constraints {
                let pk = owner.get_or_null(principal);
                if pk.is_null() {
                    return Ok(None);
                }
                cond = cond.add(column_eq(target, dep, pk)?);
            }
            return Ok(Some(cond));
        }

        let keys = self.linked_keys(association, owner_key).await?;
        if keys.is_empty() {
            return Ok(None);
        }
        keys.iter()
            .try_fold(Condition::any(), |cond, k| Ok(cond.add(key_condition(target, k)?)))
            .map(Some)
    }

    fn where_condition(query: &FindQuery<'_>, source: Condition) -> StoreResult<Condition> {
        let mut cond = Condition::all().add(source);
        for p in &query.predicates {
            cond = cond.add(expr_to_condition(query.entity, p)?);
        }
        if let Some(term) = &query.search {
            cond = cond.add(search_condition(query.entity, term));
        }
        Ok(cond)
    }

    /// Drop link rows that reference a deleted row on either side.
    async fn cleanup_links(&self, entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<()> {
        for owner in self.registry.entity_sets() {
            for prop in owner.navigation_properties() {
                let Some(nav) = prop.navigation.as_ref().filter(|n| n.is_association()) else {
                    continue;
                };
                let Some(target) = self.registry.entity(&nav.target) else {
                    continue;
                };
                let Some(association) = Association::new(owner, prop, target) else {
                    continue;
                };
                for (side, side_entity) in [("owner", association.owner), ("target", association.target)] {
                    if side_entity.entity_set != entity.entity_set {
                        continue;
                    }
                    let mut stmt = Query::delete();
                    stmt.from_table(Alias::new(association.link_table().as_str()))
                        .cond_where(link_condition(side, entity, key)?);
                    self.exec(&stmt).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for SqlTx {
    #[instrument(skip_all, fields(entity_set = %query.entity.entity_set))]
    async fn find(&mut self, query: &FindQuery<'_>) -> StoreResult<Vec<Row>> {
        ensure_plain(query)?;
        let Some(source) = self.source_condition(query).await? else {
            return Ok(Vec::new());
        };
        let entity = query.entity;
        let columns = select_columns(query);

        let mut stmt = Query::select();
        stmt.from(table(entity))
            .columns(columns.iter().map(|p| column(p)))
            .cond_where(Self::where_condition(query, source)?);
        for key in query.order.iter() {
            let prop = property(entity, &key.field)?;
            let (order, nulls) = match key.dir {
                SortDir::Asc => (Order::Asc, NullOrdering::First),
                SortDir::Desc => (Order::Desc, NullOrdering::Last),
            };
            stmt.order_by_with_nulls(column(prop), order, nulls);
        }
        match (query.top, query.skip) {
            (Some(top), _) => {
                stmt.limit(top);
            }
            // OFFSET needs a LIMIT on SQLite
            (None, Some(_)) => {
                stmt.limit(i64::MAX.unsigned_abs());
            }
            (None, None) => {}
        }
        if let Some(skip) = query.skip {
            stmt.offset(skip);
        }

        let backend = self.txn.get_database_backend();
        let rows = self.txn.query_all(backend.build(&stmt)).await?;
        debug!(rows = rows.len(), "sql find");
        rows.iter().map(|res| decode_row(&columns, res)).collect()
    }

    async fn count(&mut self, query: &FindQuery<'_>) -> StoreResult<u64> {
        ensure_plain(query)?;
        let Some(source) = self.source_condition(query).await? else {
            return Ok(0);
        };
        let mut stmt = Query::select();
        stmt.expr_as(Expr::cust("COUNT(*)"), Alias::new("n"))
            .from(table(query.entity))
            .cond_where(Self::where_condition(query, source)?);
        let backend = self.txn.get_database_backend();
        let res = self
            .txn
            .query_one(backend.build(&stmt))
            .await?
            .ok_or_else(|| StoreError::backend("COUNT(*) returned no row"))?;
        let n: i64 = res.try_get("", "n")?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    #[instrument(skip_all, fields(entity_set = %entity.entity_set))]
    async fn create(&mut self, entity: &EntityDescriptor, row: &Row) -> StoreResult<Row> {
        let mut stored = row.clone();
        let auto = auto_increment_key(entity).filter(|k| stored.get_or_null(&k.name).is_null());
        for key in entity.key_properties() {
            if !stored.get_or_null(&key.name).is_null() || auto.is_some_and(|a| a.name == key.name) {
                continue;
            }
            match (key.generated, key.kind) {
                (true, PropertyKind::Uuid) => stored.set(key.name.clone(), Value::Uuid(Uuid::new_v4())),
                (true, other) => return Err(StoreError::Unsupported(format!("generated {other} keys"))),
                (false, _) => {
                    return Err(StoreError::invalid(format!("missing key property '{}'", key.name)));
                }
            }
        }

        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for prop in entity.scalar_properties() {
            if let Some(value) = stored.get(&prop.name) {
                cols.push(column(prop));
                vals.push(SimpleExpr::from(to_sea_value(prop.kind, value)?));
            }
        }
        let mut stmt = Query::insert();
        stmt.into_table(table(entity)).columns(cols);
        if vals.is_empty() {
            stmt.or_default_values();
        } else {
            stmt.values(vals).map_err(|e| StoreError::backend(e.to_string()))?;
        }

        let backend = self.txn.get_database_backend();
        if let Some(auto) = auto {
            let id = if backend.support_returning() {
                stmt.returning(Query::returning().columns([column(auto)]));
                let res = self
                    .txn
                    .query_one(backend.build(&stmt))
                    .await?
                    .ok_or_else(|| StoreError::backend("INSERT returned no row"))?;
                res.try_get::<i64>("", &auto.name)?
            } else {
                let res = self.txn.execute(backend.build(&stmt)).await?;
                i64::try_from(res.last_insert_id()).map_err(|e| StoreError::backend(e.to_string()))?
            };
            stored.set(auto.name.clone(), Value::Int(id));
        } else {
            self.txn.execute(backend.build(&stmt)).await?;
        }

        let key = KeyValues::from_row(entity, &stored).map_err(|e| StoreError::invalid(e.to_string()))?;
        self.fetch(entity, &key).await
    }

    #[instrument(skip_all, fields(entity_set = %entity.entity_set))]
    async fn update(&mut self, entity: &EntityDescriptor, key: &KeyValues, changes: &Row) -> StoreResult<Row> {
        let mut assignments = Vec::new();
        for (name, value) in changes.iter() {
            let prop = property(entity, name)?;
            if prop.is_key {
                continue;
            }
            assignments.push((column(prop), SimpleExpr::from(to_sea_value(prop.kind, value)?)));
        }
        if !assignments.is_empty()
            && self
                .update_where(entity, assignments, key_condition(entity, key)?)
                .await?
                == 0
        {
            return Err(StoreError::NotFound(describe(entity, key)));
        }
        self.fetch(entity, key).await
    }

    #[instrument(skip_all, fields(entity_set = %entity.entity_set))]
    async fn delete(&mut self, entity: &EntityDescriptor, key: &KeyValues) -> StoreResult<()> {
        let mut stmt = Query::delete();
        stmt.from_table(table(entity)).cond_where(key_condition(entity, key)?);
        if self.exec(&stmt).await? == 0 {
            return Err(StoreError::NotFound(describe(entity, key)));
        }
        self.cleanup_links(entity, key).await
    }

    async fn append_association(
        &mut self,
        association: &Association<'_>,
        owner: &KeyValues,
        target: &KeyValues,
    ) -> StoreResult<()> {
        let nav = association.navigation;
        let owner_row = self.fetch(association.owner, owner).await?;
        let target_row = self.fetch(association.target, target).await?;

        if !nav.referential_constraints.is_empty() {
            let set = Self::fk_assignments(association.owner, nav.referential_constraints.iter(), Some(&target_row))?;
            self.update_where(association.owner, set, key_condition(association.owner, owner)?)
                .await?;
        } else if !nav.inverse_constraints.is_empty() {
            let set = Self::fk_assignments(association.target, nav.inverse_constraints.iter(), Some(&owner_row))?;
            self.update_where(association.target, set, key_condition(association.target, target)?)
                .await?;
        } else if !self
            .linked_keys(association, owner)
            .await?
            .iter()
            .any(|k| k == target)
        {
            self.insert_link(association, owner, target).await?;
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
        let owner_row = self.fetch(association.owner, owner).await?;
        for t in targets {
            self.fetch(association.target, t).await?;
        }

        if !nav.referential_constraints.is_empty() {
            return match targets {
                [] => {
                    let set = Self::fk_assignments(association.owner, nav.referential_constraints.iter(), None)?;
                    self.update_where(association.owner, set, key_condition(association.owner, owner)?)
                        .await?;
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
            let target = association.target;
            let mut linked = Condition::all();
            for (dep, principal) in &nav.inverse_constraints {
                linked = linked.add(column_eq(target, dep, owner_row.get_or_null(principal))?);
            }
            let unlink = Self::fk_assignments(target, nav.inverse_constraints.iter(), None)?;
            self.update_where(target, unlink, linked).await?;
            for t in targets {
                let link = Self::fk_assignments(target, nav.inverse_constraints.iter(), Some(&owner_row))?;
                self.update_where(target, link, key_condition(target, t)?).await?;
            }
            return Ok(());
        }

        let mut stmt = Query::delete();
        stmt.from_table(Alias::new(association.link_table().as_str()))
            .cond_where(link_condition("owner", association.owner, owner)?);
        self.exec(&stmt).await?;
        let mut inserted: Vec<&KeyValues> = Vec::new();
        for t in targets {
            if inserted.contains(&t) {
                continue;
            }
            self.insert_link(association, owner, t).await?;
            inserted.push(t);
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
        let owner_row = self.fetch(association.owner, owner).await?;
        let missing = || {
            StoreError::NotFound(format!(
                "link {}/{} -> {}",
                describe(association.owner, owner),
                association.property.name,
                describe(association.target, target)
            ))
        };

        if !nav.referential_constraints.is_empty() {
            let target_row = self
                .fetch(association.target, target)
                .await
                .map_err(|_| missing())?;
            let linked = nav
                .referential_constraints
                .iter()
                .all(|(dep, principal)| owner_row.get_or_null(dep).loosely_eq(target_row.get_or_null(principal)));
            if !linked {
                return Err(missing());
            }
            let set = Self::fk_assignments(association.owner, nav.referential_constraints.iter(), None)?;
            self.update_where(association.owner, set, key_condition(association.owner, owner)?)
                .await?;
            return Ok(());
        }

        let affected = if nav.inverse_constraints.is_empty() {
            let mut stmt = Query::delete();
            stmt.from_table(Alias::new(association.link_table().as_str()))
                .cond_where(
                    link_condition("owner", association.owner, owner)?
                        .add(link_condition("target", association.target, target)?),
                );
            self.exec(&stmt).await?
        } else {
            let t = association.target;
            let mut cond = key_condition(t, target)?;
            for (dep, principal) in &nav.inverse_constraints {
                cond = cond.add(column_eq(t, dep, owner_row.get_or_null(principal))?);
            }
            let set = Self::fk_assignments(t, nav.inverse_constraints.iter(), None)?;
            self.update_where(t, set, cond).await?
        };
        if affected == 0 {
            return Err(missing());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.txn.commit().await?;
        debug!("sql transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.txn.rollback().await?;
        debug!("sql transaction rolled back");
        Ok(())
    }
}
