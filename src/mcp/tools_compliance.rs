//! Audit-facing tools: gap detection, audit summaries, and the process
//! area views auditors walk through during site reviews.

use crate::db::Db;
use crate::error::{OtInvError, Result};
use crate::mcp::tools::{error_result, json_result, CRITICALITY_RANK_SQL};
use crate::mcp::types::ToolsCallResult;
use crate::model::{AssetType, Criticality};
use chrono::{Duration, Utc};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// Recognized gap types, in reporting order. `stale_verification` is
/// opt-in; the rest run by default.
const ALL_GAP_TYPES: &[&str] = &[
    "no_owner",
    "not_in_cmms",
    "undocumented",
    "no_security_policy",
    "unverified",
    "stale_verification",
];

const DEFAULT_GAP_TYPES: &[&str] = &[
    "no_owner",
    "not_in_cmms",
    "undocumented",
    "no_security_policy",
    "unverified",
];

const VERIFICATION_DUE_DAYS: i64 = 180;
const VERIFICATION_STALE_DAYS: i64 = 365;

#[derive(Debug, Serialize)]
struct GapAsset {
    id: String,
    name: String,
    #[serde(rename = "type")]
    asset_type: AssetType,
    criticality: Option<Criticality>,
    process_area: Option<String>,
    gap_description: String,
}

#[derive(Debug, Default)]
struct GapScope {
    process_area: Option<String>,
    criticality: Option<Criticality>,
}

fn cutoff_date(days: i64) -> String {
    (Utc::now().date_naive() - Duration::days(days)).to_string()
}

/// Run the per-type gap queries against one connection. Shared between
/// find_gaps and audit_summary.
fn collect_gaps(
    conn: &Connection,
    gap_types: &[String],
    scope: &GapScope,
) -> Result<BTreeMap<String, Vec<GapAsset>>> {
    let mut base_where = String::from(" WHERE 1=1");
    let mut base_binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(area) = &scope.process_area {
        base_where.push_str(" AND (a.process_area_id = ? OR pa.name LIKE ?)");
        base_binds.push(Box::new(area.clone()));
        base_binds.push(Box::new(format!("%{}%", area)));
    }
    if let Some(criticality) = scope.criticality {
        base_where.push_str(" AND a.criticality = ?");
        base_binds.push(Box::new(criticality));
    }

    let select = format!(
        "SELECT a.id, a.name, a.type, a.criticality, pa.name, a.last_verified \
         FROM assets a \
         LEFT JOIN process_areas pa ON a.process_area_id = pa.id{}",
        base_where
    );
    let due_cutoff = cutoff_date(VERIFICATION_DUE_DAYS);
    let stale_cutoff = cutoff_date(VERIFICATION_STALE_DAYS);

    let mut results = BTreeMap::new();
    for gap_type in ALL_GAP_TYPES {
        if !gap_types.iter().any(|g| g == gap_type) {
            continue;
        }
        let default_order = format!(" ORDER BY {}, a.name", CRITICALITY_RANK_SQL);
        let (condition, cutoff, order) = match *gap_type {
            "no_owner" => (" AND a.owner IS NULL", None, default_order),
            "not_in_cmms" => (" AND NOT a.in_cmms", None, default_order),
            "undocumented" => (" AND NOT a.documented", None, default_order),
            "no_security_policy" => (" AND NOT a.security_policy_applied", None, default_order),
            "unverified" => (
                " AND (a.last_verified IS NULL OR a.last_verified < ?)",
                Some(due_cutoff.as_str()),
                default_order,
            ),
            "stale_verification" => (
                " AND a.last_verified IS NOT NULL AND a.last_verified < ?",
                Some(stale_cutoff.as_str()),
                format!(" ORDER BY a.last_verified, {}", CRITICALITY_RANK_SQL),
            ),
            _ => unreachable!(),
        };

        let sql = format!("{}{}{}", select, condition, order);
        let mut binds: Vec<&dyn rusqlite::ToSql> =
            base_binds.iter().map(|b| b.as_ref()).collect();
        if let Some(cutoff) = &cutoff {
            binds.push(cutoff);
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds), |row| {
            let last_verified: Option<String> = row.get(5)?;
            let gap_description = match *gap_type {
                "unverified" => match &last_verified {
                    None => "Never verified".to_string(),
                    Some(date) => format!("Last verified: {}", date),
                },
                "stale_verification" => format!(
                    "Verification stale: {}",
                    last_verified.as_deref().unwrap_or_default()
                ),
                "no_owner" => "No owner assigned".to_string(),
                "not_in_cmms" => "Not registered in CMMS".to_string(),
                "undocumented" => "Missing documentation".to_string(),
                _ => "Security policy not applied".to_string(),
            };
            Ok(GapAsset {
                id: row.get(0)?,
                name: row.get(1)?,
                asset_type: row.get(2)?,
                criticality: row.get(3)?,
                process_area: row.get(4)?,
                gap_description,
            })
        })?;
        let mut assets = Vec::new();
        for row in rows {
            assets.push(row.map_err(OtInvError::Database)?);
        }
        results.insert(gap_type.to_string(), assets);
    }
    Ok(results)
}

fn gap_summary(gaps: &BTreeMap<String, Vec<GapAsset>>) -> Value {
    let total: usize = gaps.values().map(Vec::len).sum();
    let mut unique = HashSet::new();
    let mut critical = HashSet::new();
    for asset in gaps.values().flatten() {
        unique.insert(asset.id.as_str());
        if asset.criticality == Some(Criticality::Critical) {
            critical.insert(asset.id.as_str());
        }
    }
    let gap_counts: BTreeMap<&str, usize> =
        gaps.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
    json!({
        "total_gap_instances": total,
        "unique_assets_with_gaps": unique.len(),
        "critical_assets_with_gaps": critical.len(),
        "gap_counts": gap_counts,
    })
}

#[derive(Debug, Deserialize)]
struct FindGapsParams {
    gap_types: Option<Vec<String>>,
    process_area: Option<String>,
    criticality: Option<String>,
}

pub async fn handle_find_gaps(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: FindGapsParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid find_gaps params: {}", e)))?;

    let gap_types = match params.gap_types {
        Some(requested) => {
            if let Some(unknown) = requested.iter().find(|g| !ALL_GAP_TYPES.contains(&g.as_str()))
            {
                return Ok(error_result(format!("Error: unknown gap type: {}", unknown)));
            }
            requested
        }
        None => DEFAULT_GAP_TYPES.iter().map(|g| g.to_string()).collect(),
    };
    let criticality = match params.criticality.as_deref().map(Criticality::from_str) {
        Some(Err(e)) => return Ok(error_result(format!("Error: {}", e))),
        Some(Ok(c)) => Some(c),
        None => None,
    };
    let scope = GapScope {
        process_area: params.process_area,
        criticality,
    };

    let gaps = db
        .with_connection(move |conn| collect_gaps(conn, &gap_types, &scope))
        .await?;

    json_result(&json!({
        "gaps": gaps,
        "summary": gap_summary(&gaps),
    }))
}

fn pct(count: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

fn score_to_grade(score: f64) -> &'static str {
    if score >= 90.0 {
        "A"
    } else if score >= 80.0 {
        "B"
    } else if score >= 70.0 {
        "C"
    } else if score >= 60.0 {
        "D"
    } else {
        "F"
    }
}

struct ComplianceStat {
    count: i64,
    percentage: f64,
}

fn stat(count: Option<i64>, total: i64) -> ComplianceStat {
    let count = count.unwrap_or(0);
    ComplianceStat {
        count,
        percentage: pct(count, total),
    }
}

#[derive(Debug, Deserialize)]
struct AuditSummaryParams {
    process_area: Option<String>,
    #[serde(default = "default_true")]
    include_recommendations: bool,
}

fn default_true() -> bool {
    true
}

pub async fn handle_audit_summary(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: AuditSummaryParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid audit_summary params: {}", e)))?;
    let scope_label = params
        .process_area
        .clone()
        .unwrap_or_else(|| "All process areas".to_string());
    let include_recommendations = params.include_recommendations;

    let report = db
        .with_connection(move |conn| {
            let (filter_sql, filter_binds): (&str, Vec<Box<dyn rusqlite::ToSql>>) =
                match &params.process_area {
                    Some(area) => (
                        " WHERE (a.process_area_id = ? OR pa.name LIKE ?)",
                        vec![Box::new(area.clone()), Box::new(format!("%{}%", area))],
                    ),
                    None => ("", Vec::new()),
                };
            let from = "FROM assets a LEFT JOIN process_areas pa ON a.process_area_id = pa.id";
            let binds = || params_from_iter(filter_binds.iter().map(|b| b.as_ref()));

            let total_assets: i64 = conn.query_row(
                &format!("SELECT COUNT(*) {}{}", from, filter_sql),
                binds(),
                |row| row.get(0),
            )?;

            let mut by_type = BTreeMap::new();
            let mut stmt = conn.prepare(&format!(
                "SELECT a.type, COUNT(*) {}{} GROUP BY a.type",
                from, filter_sql
            ))?;
            let rows = stmt.query_map(binds(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (asset_type, count) = row.map_err(OtInvError::Database)?;
                by_type.insert(asset_type, count);
            }

            let mut by_criticality = BTreeMap::new();
            let mut stmt = conn.prepare(&format!(
                "SELECT COALESCE(a.criticality, 'unassigned'), COUNT(*) {}{} GROUP BY a.criticality",
                from, filter_sql
            ))?;
            let rows = stmt.query_map(binds(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (criticality, count) = row.map_err(OtInvError::Database)?;
                by_criticality.insert(criticality, count);
            }

            let (has_owner, in_cmms, documented, security_policy, verified) = conn.query_row(
                &format!(
                    "SELECT \
                     SUM(CASE WHEN a.owner IS NOT NULL THEN 1 ELSE 0 END), \
                     SUM(CASE WHEN a.in_cmms THEN 1 ELSE 0 END), \
                     SUM(CASE WHEN a.documented THEN 1 ELSE 0 END), \
                     SUM(CASE WHEN a.security_policy_applied THEN 1 ELSE 0 END), \
                     SUM(CASE WHEN a.last_verified IS NOT NULL THEN 1 ELSE 0 END) \
                     {}{}",
                    from, filter_sql
                ),
                binds(),
                |row| {
                    Ok((
                        stat(row.get(0)?, total_assets),
                        stat(row.get(1)?, total_assets),
                        stat(row.get(2)?, total_assets),
                        stat(row.get(3)?, total_assets),
                        stat(row.get(4)?, total_assets),
                    ))
                },
            )?;

            let critical_without_owner: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) {} WHERE a.criticality = 'critical' AND a.owner IS NULL{}",
                    from,
                    filter_sql.replacen(" WHERE", " AND", 1)
                ),
                binds(),
                |row| row.get(0),
            )?;

            let gap_types: Vec<String> =
                DEFAULT_GAP_TYPES.iter().map(|g| g.to_string()).collect();
            let scope = GapScope {
                process_area: params.process_area.clone(),
                criticality: None,
            };
            let gaps = collect_gaps(conn, &gap_types, &scope)?;

            Ok((
                total_assets,
                by_type,
                by_criticality,
                [has_owner, in_cmms, documented, security_policy, verified],
                critical_without_owner,
                gaps,
            ))
        })
        .await?;
    let (total_assets, by_type, by_criticality, stats, critical_without_owner, gaps) = report;
    let [has_owner, in_cmms, documented, security_policy, verified] = &stats;

    // Ownership and documentation weigh heaviest in the audit score.
    let weighted = has_owner.percentage * 0.25
        + in_cmms.percentage * 0.20
        + documented.percentage * 0.25
        + security_policy.percentage * 0.20
        + verified.percentage * 0.10;
    let score = (weighted * 10.0).round() / 10.0;

    let gap_totals = gap_summary(&gaps);
    let stat_json = |s: &ComplianceStat| json!({"count": s.count, "percentage": s.percentage});
    let mut result = json!({
        "audit_date": Utc::now().date_naive().to_string(),
        "scope": scope_label,
        "total_assets": total_assets,
        "assets_by_type": by_type,
        "assets_by_criticality": by_criticality,
        "compliance_statistics": {
            "has_owner": stat_json(has_owner),
            "in_cmms": stat_json(in_cmms),
            "documented": stat_json(documented),
            "security_policy_applied": stat_json(security_policy),
            "verified": stat_json(verified),
        },
        "gap_counts": gap_totals["gap_counts"],
        "critical_issues": {
            "critical_assets_without_owner": critical_without_owner,
            "unique_assets_with_gaps": gap_totals["unique_assets_with_gaps"],
            "critical_assets_with_gaps": gap_totals["critical_assets_with_gaps"],
        },
        "overall_compliance_score": {
            "score": score,
            "max_score": 100,
            "grade": score_to_grade(score),
        },
    });

    if include_recommendations {
        let mut recommendations = Vec::new();
        if critical_without_owner > 0 {
            recommendations.push(format!(
                "URGENT: Assign owners to {} critical asset(s) without ownership",
                critical_without_owner
            ));
        }
        if has_owner.percentage < 80.0 {
            recommendations.push(format!(
                "Assign owners to {} asset(s) ({:.0}% missing)",
                total_assets - has_owner.count,
                100.0 - has_owner.percentage
            ));
        }
        if in_cmms.percentage < 90.0 {
            recommendations.push(format!(
                "Register {} asset(s) in CMMS ({:.0}% not registered)",
                total_assets - in_cmms.count,
                100.0 - in_cmms.percentage
            ));
        }
        if documented.percentage < 80.0 {
            recommendations.push(format!(
                "Create documentation for {} asset(s) ({:.0}% undocumented)",
                total_assets - documented.count,
                100.0 - documented.percentage
            ));
        }
        if security_policy.percentage < 90.0 {
            recommendations.push(format!(
                "Apply security policies to {} asset(s) ({:.0}% without policy)",
                total_assets - security_policy.count,
                100.0 - security_policy.percentage
            ));
        }
        if verified.percentage < 70.0 {
            recommendations.push(format!(
                "Schedule verification for {} asset(s) ({:.0}% not recently verified)",
                total_assets - verified.count,
                100.0 - verified.percentage
            ));
        }
        if recommendations.is_empty() {
            recommendations.push("Good compliance posture - maintain current processes".to_string());
        }
        result["recommendations"] = json!(recommendations);
    }

    json_result(&result)
}

#[derive(Debug, Deserialize)]
struct ListProcessAreasParams {
    site_id: Option<String>,
    #[serde(default = "default_true")]
    include_asset_counts: bool,
}

pub async fn handle_list_process_areas(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: ListProcessAreasParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid list_process_areas params: {}", e)))?;

    let areas = db
        .with_connection(move |conn| {
            let mut sql = String::from(
                "SELECT pa.id, pa.name, pa.description, pa.function, pa.site_id, s.name \
                 FROM process_areas pa JOIN sites s ON pa.site_id = s.id",
            );
            let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(site) = &params.site_id {
                sql.push_str(" WHERE (pa.site_id = ? OR s.name LIKE ?)");
                binds.push(Box::new(site.clone()));
                binds.push(Box::new(format!("%{}%", site)));
            }
            sql.push_str(" ORDER BY s.name, pa.name");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(binds.iter().map(|b| b.as_ref())),
                |row| {
                    Ok(json!({
                        "id": row.get::<_, String>(0)?,
                        "name": row.get::<_, String>(1)?,
                        "description": row.get::<_, Option<String>>(2)?,
                        "function": row.get::<_, Option<String>>(3)?,
                        "site_id": row.get::<_, String>(4)?,
                        "site_name": row.get::<_, String>(5)?,
                    }))
                },
            )?;
            let mut areas = Vec::new();
            for row in rows {
                areas.push(row.map_err(OtInvError::Database)?);
            }

            if params.include_asset_counts {
                for area in &mut areas {
                    let area_id = area["id"].as_str().unwrap_or_default().to_string();
                    let count: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM assets WHERE process_area_id = ?1",
                        [&area_id],
                        |row| row.get(0),
                    )?;
                    area["asset_count"] = json!(count);

                    let mut stmt = conn.prepare(
                        "SELECT COALESCE(criticality, 'unassigned'), COUNT(*) \
                         FROM assets WHERE process_area_id = ?1 GROUP BY criticality",
                    )?;
                    let rows = stmt.query_map([&area_id], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })?;
                    let mut breakdown = BTreeMap::new();
                    for row in rows {
                        let (criticality, count) = row.map_err(OtInvError::Database)?;
                        breakdown.insert(criticality, count);
                    }
                    area["criticality_breakdown"] = json!(breakdown);

                    let mut stmt = conn.prepare(
                        "SELECT type, COUNT(*) FROM assets \
                         WHERE process_area_id = ?1 GROUP BY type",
                    )?;
                    let rows = stmt.query_map([&area_id], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })?;
                    let mut breakdown = BTreeMap::new();
                    for row in rows {
                        let (asset_type, count) = row.map_err(OtInvError::Database)?;
                        breakdown.insert(asset_type, count);
                    }
                    area["type_breakdown"] = json!(breakdown);
                }
            }
            Ok(areas)
        })
        .await?;

    json_result(&json!({
        "count": areas.len(),
        "process_areas": areas,
    }))
}

#[derive(Debug, Deserialize)]
struct GetProcessAreaParams {
    process_area_id: String,
}

pub async fn handle_get_process_area(db: &Db, arguments: &Value) -> Result<ToolsCallResult> {
    let params: GetProcessAreaParams = serde_json::from_value(arguments.clone())
        .map_err(|e| OtInvError::InvalidInput(format!("invalid get_process_area params: {}", e)))?;
    let area_id = params.process_area_id.clone();

    let detail = db
        .with_connection(move |conn| {
            let header = conn
                .query_row(
                    "SELECT pa.id, pa.name, pa.description, pa.function, pa.site_id, \
                     s.name, e.name \
                     FROM process_areas pa \
                     JOIN sites s ON pa.site_id = s.id \
                     JOIN environments e ON s.environment_id = e.id \
                     WHERE pa.id = ?1",
                    [&area_id],
                    |row| {
                        Ok(json!({
                            "id": row.get::<_, String>(0)?,
                            "name": row.get::<_, String>(1)?,
                            "description": row.get::<_, Option<String>>(2)?,
                            "function": row.get::<_, Option<String>>(3)?,
                            "site_id": row.get::<_, String>(4)?,
                            "site_name": row.get::<_, String>(5)?,
                            "environment_name": row.get::<_, String>(6)?,
                        }))
                    },
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    e => Err(OtInvError::Database(e)),
                })?;
            let mut detail = match header {
                Some(detail) => detail,
                None => return Ok(None),
            };

            let mut stmt = conn.prepare(&format!(
                "SELECT a.id, a.name, a.type, a.criticality, a.owner, a.ip_address \
                 FROM assets a WHERE a.process_area_id = ?1 \
                 ORDER BY {}, a.type, a.name",
                CRITICALITY_RANK_SQL
            ))?;
            let rows = stmt.query_map([&area_id], |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "type": row.get::<_, String>(2)?,
                    "criticality": row.get::<_, Option<String>>(3)?,
                    "owner": row.get::<_, Option<String>>(4)?,
                    "ip_address": row.get::<_, Option<String>>(5)?,
                }))
            })?;
            let mut assets = Vec::new();
            for row in rows {
                assets.push(row.map_err(OtInvError::Database)?);
            }
            detail["asset_count"] = json!(assets.len());
            detail["assets"] = json!(assets);

            let (total, with_owner, in_cmms, documented, with_policy) = conn.query_row(
                "SELECT COUNT(*), \
                 SUM(CASE WHEN owner IS NOT NULL THEN 1 ELSE 0 END), \
                 SUM(CASE WHEN in_cmms THEN 1 ELSE 0 END), \
                 SUM(CASE WHEN documented THEN 1 ELSE 0 END), \
                 SUM(CASE WHEN security_policy_applied THEN 1 ELSE 0 END) \
                 FROM assets WHERE process_area_id = ?1",
                [&area_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    ))
                },
            )?;
            detail["compliance_summary"] = json!({
                "total_assets": total,
                "with_owner": with_owner,
                "in_cmms": in_cmms,
                "documented": documented,
                "with_security_policy": with_policy,
                "ownership_percentage": pct(with_owner, total),
                "documentation_percentage": pct(documented, total),
            });
            Ok(Some(detail))
        })
        .await?;

    match detail {
        Some(detail) => json_result(&detail),
        None => Ok(error_result(format!(
            "Process area {} not found",
            params.process_area_id
        ))),
    }
}
