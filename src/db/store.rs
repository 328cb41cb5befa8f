//! Graph store adapter: the narrow read/write interface the traversal and
//! tool layers use against the relational store.
//!
//! Adjacency is resolved incrementally, one node's neighbor set per store
//! round-trip; no graph-shaped support is assumed of SQLite beyond the
//! source/target/type indexes.

use crate::db::Db;
use crate::error::{OtInvError, Result};
use crate::model::{Asset, AssetSummary, Criticality, Relationship, RelationshipType};
use rusqlite::{params, params_from_iter, Row};

/// Filter for relationship listings. All fields are optional and ANDed.
#[derive(Debug, Clone, Default)]
pub struct RelationshipFilter {
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    pub relationship_type: Option<RelationshipType>,
}

impl RelationshipFilter {
    /// Outgoing edges of `source_id`.
    pub fn from_source(source_id: &str) -> Self {
        Self {
            source_id: Some(source_id.to_string()),
            ..Default::default()
        }
    }

    /// Incoming edges of `target_id`.
    pub fn to_target(target_id: &str) -> Self {
        Self {
            target_id: Some(target_id.to_string()),
            ..Default::default()
        }
    }

    pub fn of_type(mut self, relationship_type: RelationshipType) -> Self {
        self.relationship_type = Some(relationship_type);
        self
    }
}

fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    Ok(Relationship {
        id: row.get(0)?,
        source_asset_id: row.get(1)?,
        target_asset_id: row.get(2)?,
        relationship_type: row.get(3)?,
        inferred: row.get(4)?,
        verified: row.get(5)?,
        description: row.get(6)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<AssetSummary> {
    Ok(AssetSummary {
        id: row.get(0)?,
        name: row.get(1)?,
        asset_type: row.get(2)?,
        criticality: row
            .get::<_, Option<Criticality>>(3)?
            .unwrap_or(Criticality::Unassigned),
        process_area_id: row.get(4)?,
    })
}

pub(crate) fn parse_json_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub(crate) fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        name: row.get(1)?,
        asset_type: row.get(2)?,
        manufacturer: row.get(3)?,
        model: row.get(4)?,
        serial_number: row.get(5)?,
        firmware_version: row.get(6)?,
        site_id: row.get(7)?,
        process_area_id: row.get(8)?,
        ip_address: row.get(9)?,
        mac_address: row.get(10)?,
        vlan: row.get(11)?,
        protocols: parse_json_list(row.get(12)?),
        function: row.get(13)?,
        owner: row.get(14)?,
        maintainer: row.get(15)?,
        last_verified: row.get(16)?,
        in_cmms: row.get(17)?,
        documented: row.get(18)?,
        security_policy_applied: row.get(19)?,
        criticality: row
            .get::<_, Option<Criticality>>(20)?
            .unwrap_or(Criticality::Unassigned),
        notes: row.get(21)?,
        tags: parse_json_list(row.get(22)?),
    })
}

pub(crate) const ASSET_COLUMNS: &str = "id, name, type, manufacturer, model, serial_number, firmware_version, \
     site_id, process_area_id, ip_address, mac_address, vlan, protocols, function, \
     owner, maintainer, last_verified, in_cmms, documented, security_policy_applied, \
     criticality, notes, tags";

/// Asset column list qualified with a table alias, for joined queries.
pub(crate) fn asset_columns_prefixed(alias: &str) -> String {
    ASSET_COLUMNS
        .split(", ")
        .map(|col| format!("{}.{}", alias, col))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fetch the full asset record, or None if the id is unknown.
pub async fn get_asset(db: &Db, asset_id: &str) -> Result<Option<Asset>> {
    let id = asset_id.to_string();
    db.with_connection(move |conn| {
        let sql = format!("SELECT {} FROM assets WHERE id = ?1", ASSET_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        match stmt.query_row(params![id], asset_from_row) {
            Ok(asset) => Ok(Some(asset)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(OtInvError::Database(e)),
        }
    })
    .await
}

/// Fetch the slim asset view used in traversal results.
pub async fn get_asset_summary(db: &Db, asset_id: &str) -> Result<Option<AssetSummary>> {
    let id = asset_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, name, type, criticality, process_area_id FROM assets WHERE id = ?1",
        )?;
        match stmt.query_row(params![id], summary_from_row) {
            Ok(summary) => Ok(Some(summary)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(OtInvError::Database(e)),
        }
    })
    .await
}

/// Check whether an asset id exists.
pub async fn asset_exists(db: &Db, asset_id: &str) -> Result<bool> {
    let id = asset_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare("SELECT 1 FROM assets WHERE id = ?1")?;
        Ok(stmt.exists(params![id])?)
    })
    .await
}

/// List relationships matching the filter, ordered by relationship id so
/// BFS discovery order is stable across runs.
pub async fn list_relationships(db: &Db, filter: RelationshipFilter) -> Result<Vec<Relationship>> {
    db.with_connection(move |conn| {
        let mut sql = String::from(
            "SELECT id, source_asset_id, target_asset_id, relationship_type, \
             inferred, verified, description FROM relationships WHERE 1=1",
        );
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(source_id) = filter.source_id {
            sql.push_str(" AND source_asset_id = ?");
            binds.push(Box::new(source_id));
        }
        if let Some(target_id) = filter.target_id {
            sql.push_str(" AND target_asset_id = ?");
            binds.push(Box::new(target_id));
        }
        if let Some(rel_type) = filter.relationship_type {
            sql.push_str(" AND relationship_type = ?");
            binds.push(Box::new(rel_type));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds.iter().map(|b| b.as_ref())), |row| {
            relationship_from_row(row)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(OtInvError::Database)?);
        }
        Ok(out)
    })
    .await
}

/// Count all outgoing relationships of an asset, any type.
pub async fn count_relationships_from(db: &Db, asset_id: &str) -> Result<usize> {
    let id = asset_id.to_string();
    db.with_connection(move |conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM relationships WHERE source_asset_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    })
    .await
}

/// True if any of the given assets has an outgoing edge of the given type.
pub async fn any_outgoing_of_type(
    db: &Db,
    asset_ids: &[String],
    relationship_type: RelationshipType,
) -> Result<bool> {
    if asset_ids.is_empty() {
        return Ok(false);
    }
    let ids = asset_ids.to_vec();
    db.with_connection(move |conn| {
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT 1 FROM relationships \
             WHERE relationship_type = ? AND source_asset_id IN ({}) LIMIT 1",
            placeholders
        );
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(relationship_type)];
        for id in ids {
            binds.push(Box::new(id));
        }
        let mut stmt = conn.prepare(&sql)?;
        Ok(stmt.exists(params_from_iter(binds.iter().map(|b| b.as_ref())))?)
    })
    .await
}

/// Distinct process-area names covering the given asset ids.
pub async fn process_area_names(db: &Db, asset_ids: &[String]) -> Result<Vec<String>> {
    if asset_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = asset_ids.to_vec();
    db.with_connection(move |conn| {
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT DISTINCT pa.name FROM assets a \
             JOIN process_areas pa ON a.process_area_id = pa.id \
             WHERE a.id IN ({}) ORDER BY pa.name",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(OtInvError::Database)?);
        }
        Ok(out)
    })
    .await
}

/// Asset summary joined with its process-area name, for analysis reports.
#[derive(Debug, Clone)]
pub struct AssetWithArea {
    pub summary: AssetSummary,
    pub process_area: Option<String>,
}

fn asset_with_area_from_row(row: &Row<'_>) -> rusqlite::Result<AssetWithArea> {
    Ok(AssetWithArea {
        summary: summary_from_row(row)?,
        process_area: row.get(5)?,
    })
}

/// Asset summary plus process-area name, or None for an unknown id.
pub async fn get_asset_with_area(db: &Db, asset_id: &str) -> Result<Option<AssetWithArea>> {
    let id = asset_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT a.id, a.name, a.type, a.criticality, a.process_area_id, pa.name \
             FROM assets a LEFT JOIN process_areas pa ON a.process_area_id = pa.id \
             WHERE a.id = ?1",
        )?;
        match stmt.query_row(params![id], asset_with_area_from_row) {
            Ok(asset) => Ok(Some(asset)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(OtInvError::Database(e)),
        }
    })
    .await
}

/// Assets whose assigned criticality is one of `levels`, optionally scoped
/// to a process area by id or by name fragment. Unassigned assets never
/// match since their criticality column is NULL.
pub async fn assets_at_criticality(
    db: &Db,
    levels: Vec<Criticality>,
    process_area: Option<String>,
) -> Result<Vec<AssetWithArea>> {
    db.with_connection(move |conn| {
        let placeholders = levels.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let mut sql = format!(
            "SELECT a.id, a.name, a.type, a.criticality, a.process_area_id, pa.name \
             FROM assets a LEFT JOIN process_areas pa ON a.process_area_id = pa.id \
             WHERE a.criticality IN ({})",
            placeholders
        );
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for level in levels {
            binds.push(Box::new(level));
        }
        if let Some(area) = process_area {
            sql.push_str(" AND (a.process_area_id = ? OR pa.name LIKE ?)");
            binds.push(Box::new(area.clone()));
            binds.push(Box::new(format!("%{}%", area)));
        }
        sql.push_str(" ORDER BY a.id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(binds.iter().map(|b| b.as_ref())),
            asset_with_area_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(OtInvError::Database)?);
        }
        Ok(out)
    })
    .await
}

/// Find an existing relationship with the exact source/target/type triple.
pub async fn find_relationship_id(
    db: &Db,
    source_id: &str,
    target_id: &str,
    relationship_type: RelationshipType,
) -> Result<Option<String>> {
    let source = source_id.to_string();
    let target = target_id.to_string();
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM relationships \
             WHERE source_asset_id = ?1 AND target_asset_id = ?2 AND relationship_type = ?3",
        )?;
        match stmt.query_row(params![source, target, relationship_type], |row| {
            row.get::<_, String>(0)
        }) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(OtInvError::Database(e)),
        }
    })
    .await
}

/// Insert a new relationship row (used by the review workflow for
/// AI-suggested, unverified edges).
pub async fn insert_relationship(db: &Db, relationship: Relationship) -> Result<()> {
    db.with_connection(move |conn| {
        conn.execute(
            "INSERT INTO relationships \
             (id, source_asset_id, target_asset_id, relationship_type, inferred, verified, description) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                relationship.id,
                relationship.source_asset_id,
                relationship.target_asset_id,
                relationship.relationship_type,
                relationship.inferred,
                relationship.verified,
                relationship.description,
            ],
        )?;
        Ok(())
    })
    .await
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::migrate::test_support::migrated_db;
    use crate::model::AssetType;
    use tempfile::TempDir;

    /// Insert a minimal asset row.
    pub async fn insert_asset(db: &Db, id: &str, asset_type: AssetType, criticality: Option<Criticality>) {
        let id = id.to_string();
        db.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO assets (id, name, type, criticality) VALUES (?1, ?2, ?3, ?4)",
                params![id, format!("{} unit", id), asset_type, criticality],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    /// Insert an edge with a deterministic id.
    pub async fn insert_edge(
        db: &Db,
        id: &str,
        source: &str,
        target: &str,
        rel_type: RelationshipType,
    ) {
        insert_relationship(
            db,
            Relationship {
                id: id.to_string(),
                source_asset_id: source.to_string(),
                target_asset_id: target.to_string(),
                relationship_type: rel_type,
                inferred: false,
                verified: true,
                description: None,
            },
        )
        .await
        .unwrap();
    }

    /// Migrated empty DB for store/graph tests.
    pub async fn test_db() -> (Db, TempDir) {
        migrated_db().await
    }
}
