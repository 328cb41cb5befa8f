//! Risk analysis tools: failure impact projection and single point of
//! failure detection.

use crate::db::Db;
use crate::error::{OtInvError, Result};
use crate::graph::analysis;
use crate::mcp::tools::{error_result, json_result};
use crate::mcp::types::ToolsCallResult;
use crate::model::{Criticality, FailureType};
use serde_json::{json, Value};
use std::str::FromStr;

#[derive(Debug, serde::Deserialize)]
struct AnalyzeImpactParams {
    asset_id: String,
    #[serde(default = "default_failure_type")]
    failure_type: String,
}

fn default_failure_type() -> String {
    "complete".to_string()
}

pub async fn handle_analyze_impact(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: AnalyzeImpactParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid analyze_impact params: {}", e)))?;
    let failure_type = match FailureType::from_str(&params.failure_type) {
        Ok(ft) => ft,
        Err(e) => return Ok(error_result(format!("Error: {}", e))),
    };

    match analysis::analyze_impact(db, &params.asset_id, failure_type).await {
        Ok(report) => json_result(&report),
        Err(OtInvError::AssetNotFound(id)) => Ok(error_result(format!("Asset {} not found", id))),
        Err(e) => Err(e),
    }
}

#[derive(Debug, serde::Deserialize)]
struct FindSpofsParams {
    #[serde(default = "default_threshold")]
    criticality_threshold: String,
    process_area: Option<String>,
}

fn default_threshold() -> String {
    "high".to_string()
}

pub async fn handle_find_spofs(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: FindSpofsParams = serde_json::from_value(arguments.clone()).map_err(|e| {
        OtInvError::InvalidInput(format!("invalid find_single_points_of_failure params: {}", e))
    })?;
    // Unknown threshold strings fall back to the default rather than erroring.
    let threshold =
        Criticality::from_str(&params.criticality_threshold).unwrap_or(Criticality::High);

    let spofs = analysis::find_spofs(db, threshold, params.process_area).await?;
    json_result(&json!({
        "criticality_threshold": threshold,
        "count": spofs.len(),
        "single_points_of_failure": spofs,
    }))
}
