//! Human-in-the-loop tools. Model-inferred relationships and data issues
//! land here as review flags until a person confirms or dismisses them.

use crate::db::{store, Db};
use crate::error::{OtInvError, Result};
use crate::mcp::tools::{clamp_limit, error_result, json_result};
use crate::mcp::types::ToolsCallResult;
use crate::model::{FlagStatus, FlagType, Relationship, RelationshipType};
use chrono::Utc;
use rusqlite::{params, params_from_iter};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct SuggestRelationshipParams {
    source_asset_id: String,
    target_asset_id: String,
    relationship_type: String,
    reasoning: String,
}

pub async fn handle_suggest_relationship(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: SuggestRelationshipParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid suggest_relationship params: {}", e)))?;
    let relationship_type = match RelationshipType::from_str(&params.relationship_type) {
        Ok(t) => t,
        Err(e) => return Ok(error_result(format!("Error: {}", e))),
    };

    let source = match store::get_asset_summary(db, &params.source_asset_id).await? {
        Some(asset) => asset,
        None => {
            return Ok(error_result(format!(
                "Source asset {} not found",
                params.source_asset_id
            )))
        }
    };
    let target = match store::get_asset_summary(db, &params.target_asset_id).await? {
        Some(asset) => asset,
        None => {
            return Ok(error_result(format!(
                "Target asset {} not found",
                params.target_asset_id
            )))
        }
    };

    if let Some(existing) = store::find_relationship_id(
        db,
        &params.source_asset_id,
        &params.target_asset_id,
        relationship_type,
    )
    .await?
    {
        return json_result(&json!({
            "status": "already_exists",
            "message": "This relationship already exists",
            "relationship_id": existing,
        }));
    }

    let relationship_id = Uuid::new_v4().to_string();
    store::insert_relationship(
        db,
        Relationship {
            id: relationship_id.clone(),
            source_asset_id: params.source_asset_id.clone(),
            target_asset_id: params.target_asset_id.clone(),
            relationship_type,
            inferred: true,
            verified: false,
            description: Some(format!("AI suggested: {}", params.reasoning)),
        },
    )
    .await?;

    let flag_id = Uuid::new_v4().to_string();
    let flag_description = format!(
        "Suggested {} relationship: {} -> {}. Reasoning: {}",
        relationship_type.as_str(),
        source.name,
        target.name,
        params.reasoning
    );
    {
        let flag_id = flag_id.clone();
        let relationship_id = relationship_id.clone();
        db.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO review_flags (id, relationship_id, flag_type, description, severity, flagged_by) \
                 VALUES (?1, ?2, 'suggested_relationship', ?3, 'medium', 'claude')",
                params![flag_id, relationship_id, flag_description],
            )?;
            Ok(())
        })
        .await?;
    }

    json_result(&json!({
        "status": "suggested",
        "relationship_id": relationship_id,
        "flag_id": flag_id,
        "source": {"id": source.id, "name": source.name, "type": source.asset_type},
        "target": {"id": target.id, "name": target.name, "type": target.asset_type},
        "relationship_type": relationship_type,
        "message": "Relationship suggested and flagged for human review",
    }))
}

const VALID_SEVERITIES: &[&str] = &["critical", "high", "medium", "low"];

#[derive(Debug, Deserialize)]
struct FlagForReviewParams {
    asset_id: String,
    flag_type: String,
    description: String,
    #[serde(default = "default_severity")]
    severity: String,
}

fn default_severity() -> String {
    "medium".to_string()
}

pub async fn handle_flag_for_review(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: FlagForReviewParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid flag_for_review params: {}", e)))?;
    let flag_type = match FlagType::from_str(&params.flag_type) {
        Ok(t) => t,
        Err(e) => return Ok(error_result(format!("Error: {}", e))),
    };
    // Unknown severities downgrade to medium instead of failing.
    let severity = if VALID_SEVERITIES.contains(&params.severity.as_str()) {
        params.severity.clone()
    } else {
        "medium".to_string()
    };

    let asset = match store::get_asset_summary(db, &params.asset_id).await? {
        Some(asset) => asset,
        None => return Ok(error_result(format!("Asset {} not found", params.asset_id))),
    };

    let flag_id = Uuid::new_v4().to_string();
    {
        let flag_id = flag_id.clone();
        let asset_id = params.asset_id.clone();
        let description = params.description.clone();
        let severity = severity.clone();
        db.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO review_flags (id, asset_id, flag_type, description, severity, flagged_by) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'claude')",
                params![flag_id, asset_id, flag_type, description, severity],
            )?;
            Ok(())
        })
        .await?;
    }

    json_result(&json!({
        "status": "flagged",
        "flag_id": flag_id,
        "asset": {"id": asset.id, "name": asset.name, "type": asset.asset_type},
        "flag_type": flag_type,
        "severity": severity,
        "description": params.description,
        "message": "Asset flagged for human review",
    }))
}

#[derive(Debug, Deserialize)]
struct ListReviewFlagsParams {
    #[serde(default = "default_status")]
    status: String,
    flag_type: Option<String>,
    asset_id: Option<String>,
    severity: Option<String>,
    #[serde(default = "default_flag_limit")]
    limit: usize,
}

fn default_status() -> String {
    "open".to_string()
}

fn default_flag_limit() -> usize {
    50
}

pub async fn handle_list_review_flags(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: ListReviewFlagsParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid list_review_flags params: {}", e)))?;
    let status = match FlagStatus::from_str(&params.status) {
        Ok(s) => s,
        Err(e) => return Ok(error_result(format!("Error: {}", e))),
    };
    let flag_type = match params.flag_type.as_deref().map(FlagType::from_str) {
        Some(Err(e)) => return Ok(error_result(format!("Error: {}", e))),
        Some(Ok(t)) => Some(t),
        None => None,
    };
    let limit = clamp_limit(params.limit, 200);

    let flags = db
        .with_connection(move |conn| {
            let mut sql = String::from(
                "SELECT rf.id, rf.flag_type, rf.description, rf.severity, rf.status, \
                 rf.flagged_by, rf.flagged_at, \
                 rf.asset_id, a.name, a.type, \
                 rf.relationship_id, r.source_asset_id, r.target_asset_id, r.relationship_type \
                 FROM review_flags rf \
                 LEFT JOIN assets a ON rf.asset_id = a.id \
                 LEFT JOIN relationships r ON rf.relationship_id = r.id \
                 WHERE rf.status = ?",
            );
            let mut binds: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(status)];
            if let Some(flag_type) = flag_type {
                sql.push_str(" AND rf.flag_type = ?");
                binds.push(Box::new(flag_type));
            }
            if let Some(asset_id) = params.asset_id {
                sql.push_str(" AND rf.asset_id = ?");
                binds.push(Box::new(asset_id));
            }
            if let Some(severity) = params.severity {
                sql.push_str(" AND rf.severity = ?");
                binds.push(Box::new(severity));
            }
            sql.push_str(&format!(
                " ORDER BY CASE rf.severity \
                 WHEN 'critical' THEN 1 WHEN 'high' THEN 2 \
                 WHEN 'medium' THEN 3 WHEN 'low' THEN 4 END, \
                 rf.flagged_at DESC LIMIT {}",
                limit
            ));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(binds.iter().map(|b| b.as_ref())),
                |row| {
                    let asset_id: Option<String> = row.get(7)?;
                    let asset = match asset_id {
                        Some(id) => json!({
                            "id": id,
                            "name": row.get::<_, Option<String>>(8)?,
                            "type": row.get::<_, Option<String>>(9)?,
                        }),
                        None => Value::Null,
                    };
                    let relationship_id: Option<String> = row.get(10)?;
                    let relationship = match relationship_id {
                        Some(id) => json!({
                            "id": id,
                            "source_id": row.get::<_, Option<String>>(11)?,
                            "target_id": row.get::<_, Option<String>>(12)?,
                            "type": row.get::<_, Option<String>>(13)?,
                        }),
                        None => Value::Null,
                    };
                    Ok(json!({
                        "id": row.get::<_, String>(0)?,
                        "flag_type": row.get::<_, String>(1)?,
                        "description": row.get::<_, String>(2)?,
                        "severity": row.get::<_, Option<String>>(3)?,
                        "status": row.get::<_, String>(4)?,
                        "flagged_by": row.get::<_, Option<String>>(5)?,
                        "flagged_at": row.get::<_, Option<String>>(6)?,
                        "asset": asset,
                        "relationship": relationship,
                    }))
                },
            )?;
            let mut flags = Vec::new();
            for row in rows {
                flags.push(row.map_err(OtInvError::Database)?);
            }
            Ok(flags)
        })
        .await?;

    json_result(&json!({
        "count": flags.len(),
        "flags": flags,
    }))
}

#[derive(Debug, Deserialize)]
struct ResolveFlagParams {
    flag_id: String,
    resolution: String,
    #[serde(default = "default_resolved_by")]
    resolved_by: String,
    notes: Option<String>,
}

fn default_resolved_by() -> String {
    "user".to_string()
}

pub async fn handle_resolve_flag(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: ResolveFlagParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid resolve_flag params: {}", e)))?;
    let resolution = match FlagStatus::from_str(&params.resolution) {
        Ok(FlagStatus::Resolved) => FlagStatus::Resolved,
        Ok(FlagStatus::Dismissed) => FlagStatus::Dismissed,
        _ => {
            return Ok(error_result(
                "Error: resolution must be resolved or dismissed",
            ))
        }
    };

    let flag_id = params.flag_id.clone();
    let resolved_by = params.resolved_by.clone();
    let notes = params.notes.clone();
    let outcome = db
        .with_connection(move |conn| {
            let flag = conn
                .query_row(
                    "SELECT status, flag_type, relationship_id FROM review_flags WHERE id = ?1",
                    [&flag_id],
                    |row| {
                        Ok((
                            row.get::<_, FlagStatus>(0)?,
                            row.get::<_, FlagType>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(OtInvError::Database(e)),
                })?;
            let (status, flag_type, relationship_id) = match flag {
                Some(flag) => flag,
                None => return Err(OtInvError::FlagNotFound(flag_id.clone())),
            };
            if status != FlagStatus::Open && status != FlagStatus::InReview {
                return Ok(Err(format!("Flag is already {}", status.as_str())));
            }

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE review_flags \
                 SET status = ?1, resolved_by = ?2, resolved_at = ?3, resolution_notes = ?4 \
                 WHERE id = ?5",
                params![resolution, resolved_by, now, notes, flag_id],
            )?;

            // A confirmed suggestion promotes the relationship to verified.
            if flag_type == FlagType::SuggestedRelationship
                && resolution == FlagStatus::Resolved
            {
                if let Some(relationship_id) = relationship_id {
                    conn.execute(
                        "UPDATE relationships \
                         SET verified = 1, verified_by = ?1, verified_at = ?2 \
                         WHERE id = ?3",
                        params![resolved_by, now, relationship_id],
                    )?;
                }
            }
            Ok(Ok(()))
        })
        .await;

    match outcome {
        Ok(Ok(())) => json_result(&json!({
            "status": "success",
            "flag_id": params.flag_id,
            "resolution": resolution,
            "resolved_by": params.resolved_by,
            "message": format!("Flag {}", resolution.as_str()),
        })),
        Ok(Err(message)) => Ok(error_result(format!("Error: {}", message))),
        Err(OtInvError::FlagNotFound(id)) => Ok(error_result(format!("Flag {} not found", id))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_support::{insert_asset, test_db};
    use crate::model::AssetType;

    async fn suggest(db: &Db) -> Value {
        let result = handle_suggest_relationship(
            db,
            &json!({
                "source_asset_id": "PLC-1",
                "target_asset_id": "GW-1",
                "relationship_type": "depends_on",
                "reasoning": "PLC traffic routes through this gateway",
            }),
        )
        .await
        .unwrap();
        serde_json::from_str(&result.content[0].text).unwrap()
    }

    #[tokio::test]
    async fn test_suggest_creates_unverified_relationship_and_flag() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC-1", AssetType::Controller, None).await;
        insert_asset(&db, "GW-1", AssetType::Gateway, None).await;

        let parsed = suggest(&db).await;
        assert_eq!(parsed["status"], "suggested");

        let rel_id = parsed["relationship_id"].as_str().unwrap().to_string();
        let rels = store::list_relationships(
            &db,
            crate::db::store::RelationshipFilter::from_source("PLC-1"),
        )
        .await
        .unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].id, rel_id);
        assert!(rels[0].inferred);
        assert!(!rels[0].verified);
        assert_eq!(
            rels[0].description.as_deref(),
            Some("AI suggested: PLC traffic routes through this gateway")
        );

        // Suggesting the same edge again reports the existing relationship.
        let again = suggest(&db).await;
        assert_eq!(again["status"], "already_exists");
        assert_eq!(again["relationship_id"], rel_id);
    }

    #[tokio::test]
    async fn test_suggest_unknown_asset() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC-1", AssetType::Controller, None).await;
        let result = handle_suggest_relationship(
            &db,
            &json!({
                "source_asset_id": "PLC-1",
                "target_asset_id": "GHOST",
                "relationship_type": "depends_on",
                "reasoning": "x",
            }),
        )
        .await
        .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_flag_for_review_and_listing() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC-1", AssetType::Controller, None).await;

        let result = handle_flag_for_review(
            &db,
            &json!({
                "asset_id": "PLC-1",
                "flag_type": "missing_data",
                "description": "No firmware version recorded",
                "severity": "catastrophic",
            }),
        )
        .await
        .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["status"], "flagged");
        assert_eq!(parsed["severity"], "medium");

        let listed = handle_list_review_flags(&db, &json!({})).await.unwrap();
        let parsed: Value = serde_json::from_str(&listed.content[0].text).unwrap();
        assert_eq!(parsed["count"], 1);
        assert_eq!(parsed["flags"][0]["flag_type"], "missing_data");
        assert_eq!(parsed["flags"][0]["asset"]["id"], "PLC-1");
        assert!(parsed["flags"][0]["relationship"].is_null());
    }

    #[tokio::test]
    async fn test_resolve_suggested_relationship_verifies_edge() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC-1", AssetType::Controller, None).await;
        insert_asset(&db, "GW-1", AssetType::Gateway, None).await;
        let suggested = suggest(&db).await;
        let flag_id = suggested["flag_id"].as_str().unwrap();

        let result = handle_resolve_flag(
            &db,
            &json!({"flag_id": flag_id, "resolution": "resolved", "resolved_by": "ot-engineer"}),
        )
        .await
        .unwrap();
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["status"], "success");
        assert_eq!(parsed["message"], "Flag resolved");

        let rels = store::list_relationships(
            &db,
            crate::db::store::RelationshipFilter::from_source("PLC-1"),
        )
        .await
        .unwrap();
        assert!(rels[0].verified);

        // Already-resolved flags cannot be resolved twice.
        let again = handle_resolve_flag(
            &db,
            &json!({"flag_id": flag_id, "resolution": "dismissed"}),
        )
        .await
        .unwrap();
        assert_eq!(again.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_resolve_unknown_flag() {
        let (db, _temp) = test_db().await;
        let result = handle_resolve_flag(
            &db,
            &json!({"flag_id": "nope", "resolution": "resolved"}),
        )
        .await
        .unwrap();
        assert_eq!(result.is_error, Some(true));
    }
}
