//! Graph tools: directional traversals, dependency maps, edge listings,
//! and shortest-path queries.

use crate::db::store::{self, RelationshipFilter};
use crate::db::Db;
use crate::error::{OtInvError, Result};
use crate::graph::{dependents, path, redundancy, traversal, Direction, TraversedAsset, DEFAULT_MAX_DEPTH};
use crate::mcp::tools::{clamp_limit, error_result, json_result};
use crate::mcp::types::ToolsCallResult;
use crate::model::RelationshipType;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Hop bound ceiling for caller-supplied depths.
const MAX_TRAVERSAL_DEPTH: usize = 10;

#[derive(Debug, serde::Deserialize)]
struct TraverseParams {
    asset_id: String,
    relationship_types: Option<Vec<String>>,
    #[serde(default = "default_max_depth")]
    max_depth: usize,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn parse_relationship_types(
    raw: Option<Vec<String>>,
) -> std::result::Result<Option<Vec<RelationshipType>>, String> {
    match raw {
        None => Ok(None),
        Some(names) => {
            let mut types = Vec::with_capacity(names.len());
            for name in names {
                types.push(RelationshipType::from_str(&name)?);
            }
            Ok(Some(types))
        }
    }
}

fn count_by<F>(assets: &[TraversedAsset], key: F) -> BTreeMap<String, usize>
where
    F: Fn(&TraversedAsset) -> &'static str,
{
    let mut counts = BTreeMap::new();
    for asset in assets {
        *counts.entry(key(asset).to_string()).or_insert(0) += 1;
    }
    counts
}

async fn handle_traverse(
    db: &Db,
    arguments: &Value,
    direction: Direction,
) -> Result<ToolsCallResult> {
    let params: TraverseParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid traversal params: {}", e)))?;
    let types = match parse_relationship_types(params.relationship_types) {
        Ok(types) => types,
        Err(e) => return Ok(error_result(format!("Error: {}", e))),
    };
    let max_depth = clamp_limit(params.max_depth, MAX_TRAVERSAL_DEPTH);

    let result = traversal::traverse(db, &params.asset_id, direction, types, max_depth).await?;
    let label = match direction {
        Direction::Upstream => "total_upstream_assets",
        Direction::Downstream => "total_downstream_assets",
    };
    let summary = json!({
        label: result.assets.len(),
        "assets_by_type": count_by(&result.assets, |a| a.asset.asset_type.as_str()),
        "assets_by_criticality": count_by(&result.assets, |a| a.asset.criticality.as_str()),
    });

    let mut value = serde_json::to_value(&result)
        .map_err(|e| OtInvError::Parse(format!("traversal serialization: {}", e)))?;
    value["summary"] = summary;
    json_result(&value)
}

pub async fn handle_get_upstream(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    handle_traverse(db, arguments, Direction::Upstream).await
}

pub async fn handle_get_downstream(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    handle_traverse(db, arguments, Direction::Downstream).await
}

#[derive(Debug, serde::Deserialize)]
struct DependenciesParams {
    asset_id: String,
    #[serde(default = "default_max_depth")]
    max_depth: usize,
}

pub async fn handle_get_dependencies(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: DependenciesParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid get_dependencies params: {}", e)))?;
    let max_depth = clamp_limit(params.max_depth, MAX_TRAVERSAL_DEPTH);

    let asset = match store::get_asset_summary(db, &params.asset_id).await? {
        Some(asset) => asset,
        None => return Ok(error_result(format!("Asset {} not found", params.asset_id))),
    };

    let upstream =
        traversal::traverse(db, &params.asset_id, Direction::Upstream, None, max_depth).await?;
    let downstream =
        traversal::traverse(db, &params.asset_id, Direction::Downstream, None, max_depth).await?;
    let deps = dependents::find_dependents(db, &params.asset_id, max_depth).await?;
    let redundancy_report = redundancy::check_redundancy(db, &params.asset_id).await?;

    // What this asset explicitly depends on (outgoing depends_on).
    let mut depends_on = Vec::new();
    let outgoing = store::list_relationships(
        db,
        RelationshipFilter::from_source(&params.asset_id).of_type(RelationshipType::DependsOn),
    )
    .await?;
    for rel in outgoing {
        if let Some(target) = store::get_asset_summary(db, &rel.target_asset_id).await? {
            depends_on.push(json!({
                "id": target.id,
                "name": target.name,
                "type": target.asset_type,
                "criticality": target.criticality,
                "description": rel.description,
            }));
        }
    }

    json_result(&json!({
        "asset": asset,
        "upstream": {
            "count": upstream.assets.len(),
            "assets": upstream.assets,
        },
        "downstream": {
            "count": downstream.assets.len(),
            "assets": downstream.assets,
        },
        "depends_on": depends_on,
        "dependents": {
            "count": deps.len(),
            "assets": deps,
        },
        "redundancy": redundancy_report,
    }))
}

#[derive(Debug, serde::Deserialize)]
struct ListRelationshipsParams {
    source_asset_id: Option<String>,
    target_asset_id: Option<String>,
    relationship_type: Option<String>,
    #[serde(default)]
    verified_only: bool,
    #[serde(default = "default_rel_limit")]
    limit: usize,
}

fn default_rel_limit() -> usize {
    100
}

pub async fn handle_list_relationships(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: ListRelationshipsParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid list_relationships params: {}", e)))?;
    let rel_type = match params.relationship_type.as_deref().map(RelationshipType::from_str) {
        Some(Err(e)) => return Ok(error_result(format!("Error: {}", e))),
        Some(Ok(t)) => Some(t),
        None => None,
    };
    let limit = clamp_limit(params.limit, 500);

    let filter = RelationshipFilter {
        source_id: params.source_asset_id,
        target_id: params.target_asset_id,
        relationship_type: rel_type,
    };
    let mut relationships = store::list_relationships(db, filter).await?;
    if params.verified_only {
        relationships.retain(|r| r.verified);
    }
    relationships.truncate(limit);

    let mut entries = Vec::with_capacity(relationships.len());
    for rel in relationships {
        let source = store::get_asset_summary(db, &rel.source_asset_id).await?;
        let target = store::get_asset_summary(db, &rel.target_asset_id).await?;
        entries.push(json!({
            "id": rel.id,
            "source": {
                "id": rel.source_asset_id,
                "name": source.as_ref().map(|s| s.name.clone()),
                "type": source.map(|s| s.asset_type),
            },
            "target": {
                "id": rel.target_asset_id,
                "name": target.as_ref().map(|t| t.name.clone()),
                "type": target.map(|t| t.asset_type),
            },
            "relationship_type": rel.relationship_type,
            "inferred": rel.inferred,
            "verified": rel.verified,
            "description": rel.description,
        }));
    }

    json_result(&json!({
        "count": entries.len(),
        "relationships": entries,
    }))
}

#[derive(Debug, serde::Deserialize)]
struct FindPathParams {
    source_asset_id: String,
    target_asset_id: String,
}

pub async fn handle_find_path(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: FindPathParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid find_path params: {}", e)))?;

    match path::find_path(db, &params.source_asset_id, &params.target_asset_id).await {
        Ok(result) => json_result(&result),
        Err(OtInvError::AssetNotFound(id)) => Ok(error_result(format!("Asset {} not found", id))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_support::{insert_asset, insert_edge, test_db};
    use crate::model::AssetType;

    #[tokio::test]
    async fn test_upstream_tool_summarizes() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "S1", AssetType::Sensor, None).await;
        insert_asset(&db, "PLC", AssetType::Controller, None).await;
        insert_edge(&db, "r1", "S1", "PLC", RelationshipType::FeedsDataTo).await;

        let result = handle_get_upstream(&db, &json!({"asset_id": "PLC"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["summary"]["total_upstream_assets"], 1);
        assert_eq!(parsed["summary"]["assets_by_type"]["Sensor"], 1);
        assert_eq!(parsed["assets"][0]["id"], "S1");
    }

    #[tokio::test]
    async fn test_traverse_rejects_bad_relationship_type() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC", AssetType::Controller, None).await;
        let result = handle_get_downstream(
            &db,
            &json!({"asset_id": "PLC", "relationship_types": ["wires"]}),
        )
        .await
        .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_dependencies_tool() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "GW", AssetType::Gateway, None).await;
        insert_asset(&db, "PLC", AssetType::Controller, None).await;
        insert_edge(&db, "r1", "PLC", "GW", RelationshipType::DependsOn).await;

        let result = handle_get_dependencies(&db, &json!({"asset_id": "PLC"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["depends_on"][0]["id"], "GW");
        assert_eq!(parsed["dependents"]["count"], 0);

        let result = handle_get_dependencies(&db, &json!({"asset_id": "GW"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["dependents"]["count"], 1);
    }

    #[tokio::test]
    async fn test_list_relationships_verified_only() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "A", AssetType::Controller, None).await;
        insert_asset(&db, "B", AssetType::Actuator, None).await;
        insert_edge(&db, "r1", "A", "B", RelationshipType::Controls).await;
        store::insert_relationship(
            &db,
            crate::model::Relationship {
                id: "r2".to_string(),
                source_asset_id: "A".to_string(),
                target_asset_id: "B".to_string(),
                relationship_type: RelationshipType::Powers,
                inferred: true,
                verified: false,
                description: None,
            },
        )
        .await
        .unwrap();

        let result = handle_list_relationships(&db, &json!({"verified_only": true}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["relationships"][0]["id"], "r1");
    }

    #[tokio::test]
    async fn test_find_path_tool_not_found() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "A", AssetType::Controller, None).await;
        let result = handle_find_path(
            &db,
            &json!({"source_asset_id": "A", "target_asset_id": "GHOST"}),
        )
        .await
        .unwrap();
        assert_eq!(result.is_error, Some(true));
    }
}
