//! Asset query tools: list, detail, and text search.

use crate::db::store::{self, RelationshipFilter};
use crate::db::Db;
use crate::error::{OtInvError, Result};
use crate::mcp::tools::{clamp_limit, error_result, json_result, CRITICALITY_RANK_SQL};
use crate::mcp::types::ToolsCallResult;
use crate::model::{Asset, AssetType, Criticality};
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

/// Full asset record plus the joined area and site names.
#[derive(Debug, Serialize)]
struct AssetListing {
    #[serde(flatten)]
    asset: Asset,
    process_area_name: Option<String>,
    site_name: Option<String>,
}

fn listing_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetListing> {
    Ok(AssetListing {
        asset: store::asset_from_row(row)?,
        process_area_name: row.get(23)?,
        site_name: row.get(24)?,
    })
}

fn listing_select() -> String {
    format!(
        "SELECT {}, pa.name, s.name FROM assets a \
         LEFT JOIN process_areas pa ON a.process_area_id = pa.id \
         LEFT JOIN sites s ON a.site_id = s.id",
        store::asset_columns_prefixed("a")
    )
}

#[derive(Debug, Deserialize)]
struct ListAssetsParams {
    asset_type: Option<String>,
    process_area: Option<String>,
    site: Option<String>,
    criticality: Option<String>,
    owner: Option<String>,
    #[serde(default)]
    has_gaps: bool,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    50
}

pub async fn handle_list_assets(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: ListAssetsParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid list_assets params: {}", e)))?;

    let asset_type = match params.asset_type.as_deref().map(AssetType::from_str) {
        Some(Err(e)) => return Ok(error_result(format!("Error: {}", e))),
        Some(Ok(t)) => Some(t),
        None => None,
    };
    let criticality = match params.criticality.as_deref().map(Criticality::from_str) {
        Some(Err(e)) => return Ok(error_result(format!("Error: {}", e))),
        Some(Ok(c)) => Some(c),
        None => None,
    };
    let limit = clamp_limit(params.limit, 100);

    let assets = db
        .with_connection(move |conn| {
            let mut sql = listing_select();
            sql.push_str(" WHERE 1=1");
            let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(asset_type) = asset_type {
                sql.push_str(" AND a.type = ?");
                binds.push(Box::new(asset_type));
            }
            if let Some(area) = params.process_area {
                sql.push_str(" AND (a.process_area_id = ? OR pa.name LIKE ?)");
                binds.push(Box::new(area.clone()));
                binds.push(Box::new(format!("%{}%", area)));
            }
            if let Some(site) = params.site {
                sql.push_str(" AND (a.site_id = ? OR s.name LIKE ?)");
                binds.push(Box::new(site.clone()));
                binds.push(Box::new(format!("%{}%", site)));
            }
            if let Some(criticality) = criticality {
                sql.push_str(" AND a.criticality = ?");
                binds.push(Box::new(criticality));
            }
            if let Some(owner) = params.owner {
                sql.push_str(" AND a.owner LIKE ?");
                binds.push(Box::new(format!("%{}%", owner)));
            }
            if params.has_gaps {
                sql.push_str(
                    " AND (a.owner IS NULL OR NOT a.in_cmms \
                     OR NOT a.documented OR NOT a.security_policy_applied)",
                );
            }
            sql.push_str(&format!(" ORDER BY {}, a.name LIMIT {}", CRITICALITY_RANK_SQL, limit));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(binds.iter().map(|b| b.as_ref())),
                listing_from_row,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(OtInvError::Database)?);
            }
            Ok(out)
        })
        .await?;

    json_result(&json!({
        "count": assets.len(),
        "assets": assets,
    }))
}

#[derive(Debug, Deserialize)]
struct GetAssetParams {
    asset_id: String,
}

pub async fn handle_get_asset(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: GetAssetParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid get_asset params: {}", e)))?;

    let asset_id = params.asset_id.clone();
    let listing = db
        .with_connection(move |conn| {
            let sql = format!("{} WHERE a.id = ?1", listing_select());
            let mut stmt = conn.prepare(&sql)?;
            match stmt.query_row([&asset_id], listing_from_row) {
                Ok(listing) => Ok(Some(listing)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(OtInvError::Database(e)),
            }
        })
        .await?;

    let listing = match listing {
        Some(l) => l,
        None => {
            return Ok(error_result(format!(
                "Asset {} not found",
                params.asset_id
            )))
        }
    };

    let mut outgoing = Vec::new();
    for rel in
        store::list_relationships(db, RelationshipFilter::from_source(&params.asset_id)).await?
    {
        let target = store::get_asset_summary(db, &rel.target_asset_id).await?;
        outgoing.push(json!({
            "id": rel.id,
            "target_id": rel.target_asset_id,
            "target_name": target.as_ref().map(|t| t.name.clone()),
            "target_type": target.map(|t| t.asset_type),
            "relationship_type": rel.relationship_type,
            "verified": rel.verified,
            "inferred": rel.inferred,
            "description": rel.description,
        }));
    }

    let mut incoming = Vec::new();
    for rel in
        store::list_relationships(db, RelationshipFilter::to_target(&params.asset_id)).await?
    {
        let source = store::get_asset_summary(db, &rel.source_asset_id).await?;
        incoming.push(json!({
            "id": rel.id,
            "source_id": rel.source_asset_id,
            "source_name": source.as_ref().map(|s| s.name.clone()),
            "source_type": source.map(|s| s.asset_type),
            "relationship_type": rel.relationship_type,
            "verified": rel.verified,
            "inferred": rel.inferred,
            "description": rel.description,
        }));
    }

    let asset_id = params.asset_id.clone();
    let open_flags = db
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, flag_type, description, severity FROM review_flags \
                 WHERE asset_id = ?1 AND status = 'open'",
            )?;
            let rows = stmt.query_map([&asset_id], |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "flag_type": row.get::<_, String>(1)?,
                    "description": row.get::<_, String>(2)?,
                    "severity": row.get::<_, Option<String>>(3)?,
                }))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(OtInvError::Database)?);
            }
            Ok(out)
        })
        .await?;

    let asset = &listing.asset;
    let gap_count = [
        asset.owner.is_none(),
        !asset.in_cmms,
        !asset.documented,
        !asset.security_policy_applied,
    ]
    .iter()
    .filter(|g| **g)
    .count();
    let compliance_summary = json!({
        "has_owner": asset.owner.is_some(),
        "in_cmms": asset.in_cmms,
        "documented": asset.documented,
        "security_policy_applied": asset.security_policy_applied,
        "verified": asset.last_verified.is_some(),
        "gap_count": gap_count,
    });

    let mut result = serde_json::to_value(&listing)
        .map_err(|e| OtInvError::Parse(format!("asset serialization: {}", e)))?;
    result["outgoing_relationships"] = Value::Array(outgoing);
    result["incoming_relationships"] = Value::Array(incoming);
    result["open_flags"] = Value::Array(open_flags);
    result["compliance_summary"] = compliance_summary;

    json_result(&result)
}

const SEARCHABLE_FIELDS: &[&str] = &[
    "name",
    "manufacturer",
    "model",
    "notes",
    "function",
    "id",
    "owner",
    "ip_address",
];

const DEFAULT_SEARCH_FIELDS: &[&str] = &["name", "manufacturer", "model", "notes", "function", "id"];

#[derive(Debug, Deserialize)]
struct SearchAssetsParams {
    query: String,
    fields: Option<Vec<String>>,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    20
}

pub async fn handle_search_assets(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: SearchAssetsParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid search_assets params: {}", e)))?;

    let fields: Vec<String> = match params.fields {
        Some(fields) => fields
            .into_iter()
            .filter(|f| SEARCHABLE_FIELDS.contains(&f.as_str()))
            .collect(),
        None => DEFAULT_SEARCH_FIELDS.iter().map(|f| f.to_string()).collect(),
    };
    if fields.is_empty() {
        return Ok(error_result("Error: no searchable fields given"));
    }
    let limit = clamp_limit(params.limit, 50);
    let search_term = format!("%{}%", params.query);
    let query = params.query.clone();

    let assets = db
        .with_connection(move |conn| {
            let conditions = fields
                .iter()
                .map(|f| format!("a.{} LIKE ?", f))
                .collect::<Vec<_>>()
                .join(" OR ");
            // Exact-name matches sort ahead of everything else.
            let sql = format!(
                "{} WHERE {} ORDER BY CASE WHEN a.name LIKE ? THEN 0 ELSE 1 END, {}, a.name LIMIT {}",
                listing_select(),
                conditions,
                CRITICALITY_RANK_SQL,
                limit
            );
            let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            for _ in 0..fields.len() {
                binds.push(Box::new(search_term.clone()));
            }
            binds.push(Box::new(search_term.clone()));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(binds.iter().map(|b| b.as_ref())),
                listing_from_row,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(OtInvError::Database)?);
            }
            Ok(out)
        })
        .await?;

    json_result(&json!({
        "query": query,
        "count": assets.len(),
        "assets": assets,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_support::{insert_asset, test_db};
    use crate::model::RelationshipType;

    #[tokio::test]
    async fn test_list_assets_filters_by_type() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC-1", AssetType::Controller, Some(Criticality::High)).await;
        insert_asset(&db, "SW-1", AssetType::Switch, None).await;

        let result = handle_list_assets(&db, &json!({"asset_type": "Controller"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["assets"][0]["id"], "PLC-1");
    }

    #[tokio::test]
    async fn test_list_assets_rejects_unknown_type() {
        let (db, _temp) = test_db().await;
        let result = handle_list_assets(&db, &json!({"asset_type": "Toaster"}))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_get_asset_detail() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC-1", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "V-1", AssetType::Actuator, None).await;
        crate::db::store::test_support::insert_edge(
            &db,
            "r1",
            "PLC-1",
            "V-1",
            RelationshipType::Controls,
        )
        .await;

        let result = handle_get_asset(&db, &json!({"asset_id": "PLC-1"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["id"], "PLC-1");
        assert_eq!(parsed["outgoing_relationships"][0]["target_id"], "V-1");
        assert_eq!(parsed["compliance_summary"]["gap_count"], 4);
    }

    #[tokio::test]
    async fn test_get_asset_unknown_is_tool_error() {
        let (db, _temp) = test_db().await;
        let result = handle_get_asset(&db, &json!({"asset_id": "GHOST"}))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_search_assets_matches_name() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC-1", AssetType::Controller, None).await;
        insert_asset(&db, "SW-1", AssetType::Switch, None).await;

        let result = handle_search_assets(&db, &json!({"query": "PLC"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["assets"][0]["id"], "PLC-1");
    }
}
