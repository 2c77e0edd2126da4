//! DDL for entity tables and association link tables.

use odata_model::{EntityDescriptor, PropertyDescriptor, PropertyKind, Registry};
use sea_orm::sea_query::{Alias, ColumnDef, Index, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DbBackend};
use tracing::{debug, info};

use super::condition::column;
use crate::error::{StoreError, StoreResult};
use crate::store::Association;

/// Column of a link table: `owner_<Key>` or `target_<Key>`.
pub(super) fn link_column(side: &str, key: &PropertyDescriptor) -> String {
    format!("{side}_{}", key.name)
}

fn column_type(def: &mut ColumnDef, kind: PropertyKind) {
    match kind {
        PropertyKind::String => def.string(),
        PropertyKind::Int => def.big_integer(),
        PropertyKind::Decimal => def.decimal(),
        PropertyKind::Bool => def.boolean(),
        PropertyKind::Uuid => def.uuid(),
        PropertyKind::DateTime => def.timestamp_with_time_zone(),
        PropertyKind::Date => def.date(),
        PropertyKind::Time => def.time(),
        PropertyKind::Complex | PropertyKind::Navigation => def.text(),
    };
}

/// Single generated integer key backed by the database sequence.
pub(super) fn auto_increment_key(entity: &EntityDescriptor) -> Option<&PropertyDescriptor> {
    let mut keys = entity.key_properties();
    match (keys.next(), keys.next()) {
        (Some(only), None) if only.generated && only.kind == PropertyKind::Int => Some(only),
        _ => None,
    }
}

fn entity_table(backend: DbBackend, entity: &EntityDescriptor) -> TableCreateStatement {
    let mut stmt = Table::create();
    stmt.table(Alias::new(entity.table_name())).if_not_exists();

    let auto = auto_increment_key(entity).map(|p| p.name.as_str());
    for prop in entity.scalar_properties() {
        let mut def = ColumnDef::new(column(prop));
        if auto == Some(prop.name.as_str()) {
            // SQLite only auto-increments INTEGER PRIMARY KEY
            if backend == DbBackend::Sqlite {
                def.integer();
            } else {
                def.big_integer();
            }
            def.not_null().auto_increment().primary_key();
        } else {
            column_type(&mut def, prop.kind);
            if prop.is_key || !prop.nullable {
                def.not_null();
            }
        }
        stmt.col(&mut def);
    }

    if auto.is_none() {
        let mut pk = Index::create();
        for key in entity.key_properties() {
            pk.col(column(key));
        }
        stmt.primary_key(&mut pk);
    }
    stmt
}

fn link_table(association: &Association<'_>) -> TableCreateStatement {
    let mut stmt = Table::create();
    stmt.table(Alias::new(association.link_table())).if_not_exists();

    let mut pk = Index::create();
    for (side, entity) in [("owner", association.owner), ("target", association.target)] {
        for key in entity.key_properties() {
            let name = link_column(side, key);
            let mut def = ColumnDef::new(Alias::new(name.as_str()));
            column_type(&mut def, key.kind);
            def.not_null();
            stmt.col(&mut def);
            pk.col(Alias::new(name.as_str()));
        }
    }
    stmt.primary_key(&mut pk);
    stmt
}

/// Create every entity table and association link table of `registry`
/// that does not exist yet.
///
/// # Errors
/// `StoreError::Backend` when a statement fails.
pub async fn create_schema<C: ConnectionTrait>(conn: &C, registry: &Registry) -> StoreResult<()> {
    let backend = conn.get_database_backend();

    for entity in registry.entity_sets() {
        debug!(table = entity.table_name(), "creating entity table");
        conn.execute(backend.build(&entity_table(backend, entity))).await?;
    }

    let mut links = 0usize;
    for entity in registry.entity_sets() {
        for prop in entity.navigation_properties() {
            let Some(nav) = prop.navigation.as_ref().filter(|n| n.is_association()) else {
                continue;
            };
            let target = registry.entity(&nav.target).ok_or_else(|| {
                StoreError::invalid(format!("unknown navigation target '{}'", nav.target))
            })?;
            let Some(association) = Association::new(entity, prop, target) else {
                continue;
            };
            debug!(table = %association.link_table(), "creating link table");
            conn.execute(backend.build(&link_table(&association))).await?;
            links += 1;
        }
    }

    info!(
        entity_tables = registry.len(),
        link_tables = links,
        "schema ready"
    );
    Ok(())
}
