//! Risk analysis: single-point-of-failure scoring and cascading-impact
//! reports, built on the traversal primitives.

use std::collections::HashSet;

use crate::db::store::{self, RelationshipFilter};
use crate::db::Db;
use crate::graph::{dependents, redundancy, RedundancyReport, DEFAULT_MAX_DEPTH};
use crate::model::{AssetType, Criticality, FailureType, RelationshipType};
use crate::{OtInvError, Result};

/// Dependency chains longer than this do not count toward SPOF scoring.
const SPOF_DEPENDENT_DEPTH: usize = 3;

/// Risk score ceiling.
const MAX_RISK_SCORE: u32 = 200;

#[derive(Debug, Clone, serde::Serialize)]
pub struct Spof {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub criticality: Criticality,
    pub process_area: Option<String>,
    pub dependent_count: usize,
    pub critical_dependents: usize,
    pub downstream_count: usize,
    pub risk_score: u32,
    pub risk_level: Criticality,
    pub recommendation: String,
}

/// Identify single points of failure: non-redundant assets at or above the
/// criticality threshold that other assets depend on, or that fan out to
/// more than two downstream edges.
///
/// Results are sorted by risk score, highest first.
pub async fn find_spofs(
    db: &Db,
    criticality_threshold: Criticality,
    process_area: Option<String>,
) -> Result<Vec<Spof>> {
    // An unassigned threshold is not a meaningful cutoff; fall back to the
    // default rather than failing the request.
    let threshold = match criticality_threshold {
        Criticality::Unassigned => Criticality::High,
        c => c,
    };
    let levels = Criticality::levels_at_or_above(threshold);
    let candidates = store::assets_at_criticality(db, levels, process_area).await?;

    let mut spofs = Vec::new();
    for candidate in candidates {
        let asset_id = candidate.summary.id.clone();

        if redundancy::check_redundancy(db, &asset_id).await?.has_redundancy {
            continue;
        }

        let deps = dependents::find_dependents(db, &asset_id, SPOF_DEPENDENT_DEPTH).await?;
        let dependent_count = deps.len();
        let critical_dependents = deps
            .iter()
            .filter(|d| d.criticality == Criticality::Critical)
            .count();
        let downstream_count = store::count_relationships_from(db, &asset_id).await?;

        if dependent_count == 0 && downstream_count <= 2 {
            continue;
        }

        let risk_score = spof_risk_score(
            candidate.summary.criticality,
            dependent_count,
            critical_dependents,
            downstream_count,
        );
        let recommendation = spof_recommendation(
            candidate.summary.criticality,
            dependent_count,
            critical_dependents,
        );
        spofs.push(Spof {
            id: candidate.summary.id,
            name: candidate.summary.name,
            asset_type: candidate.summary.asset_type,
            criticality: candidate.summary.criticality,
            process_area: candidate.process_area,
            dependent_count,
            critical_dependents,
            downstream_count,
            risk_score,
            risk_level: risk_level(risk_score),
            recommendation,
        });
    }

    spofs.sort_by(|a, b| b.risk_score.cmp(&a.risk_score));
    Ok(spofs)
}

fn spof_risk_score(
    criticality: Criticality,
    dependent_count: usize,
    critical_dependents: usize,
    downstream_count: usize,
) -> u32 {
    let base: u32 = match criticality {
        Criticality::Critical => 100,
        Criticality::High => 75,
        Criticality::Medium => 50,
        Criticality::Low | Criticality::Unassigned => 25,
    };
    let score = base
        + dependent_count as u32 * 10
        + critical_dependents as u32 * 25
        + downstream_count as u32 * 5;
    score.min(MAX_RISK_SCORE)
}

fn risk_level(score: u32) -> Criticality {
    if score >= 150 {
        Criticality::Critical
    } else if score >= 100 {
        Criticality::High
    } else if score >= 50 {
        Criticality::Medium
    } else {
        Criticality::Low
    }
}

fn spof_recommendation(
    criticality: Criticality,
    dependent_count: usize,
    critical_dependents: usize,
) -> String {
    if critical_dependents > 0 {
        format!(
            "URGENT: Add redundancy - {} critical asset(s) depend on this",
            critical_dependents
        )
    } else if dependent_count > 3 {
        format!(
            "HIGH PRIORITY: Multiple systems ({}) depend on this asset",
            dependent_count
        )
    } else if criticality == Criticality::Critical {
        "Critical asset without redundancy - evaluate backup options".to_string()
    } else {
        "Consider adding redundancy or backup procedures".to_string()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FailingAsset {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub criticality: Criticality,
    pub process_area: Option<String>,
    pub function: Option<String>,
}

/// An asset one forward hop from the failing asset. One entry per edge, so
/// a target connected by two relationships appears twice, once per type.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DirectImpact {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub criticality: Criticality,
    pub process_area: Option<String>,
    pub impact_type: RelationshipType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CascadeEffect {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub criticality: Criticality,
    pub dependency_depth: usize,
    pub dependency_path: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CriticalitySummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl CriticalitySummary {
    fn count(&mut self, criticality: Criticality) {
        match criticality {
            Criticality::Critical => self.critical += 1,
            Criticality::High => self.high += 1,
            Criticality::Medium => self.medium += 1,
            Criticality::Low => self.low += 1,
            Criticality::Unassigned => {}
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ImpactReport {
    pub failing_asset: FailingAsset,
    pub failure_type: FailureType,
    pub directly_affected: Vec<DirectImpact>,
    pub directly_affected_count: usize,
    pub cascade_effects: Vec<CascadeEffect>,
    pub cascade_count: usize,
    pub total_affected: usize,
    pub affected_process_areas: Vec<String>,
    pub criticality_summary: CriticalitySummary,
    pub safety_implications: bool,
    pub has_redundancy: bool,
    pub redundancy_details: RedundancyReport,
    pub recommendations: Vec<String>,
}

/// Trace everything affected if `asset_id` fails: direct downstream edges,
/// cascade through dependency chains, process areas touched, safety
/// exposure, and mitigation recommendations.
///
/// `failure_type` is carried through as scenario metadata; it does not
/// change the traversal or scoring.
///
/// The criticality summary counts direct and cascade entries independently,
/// so an asset reachable both ways is counted twice; the process-area set
/// deduplicates.
pub async fn analyze_impact(
    db: &Db,
    asset_id: &str,
    failure_type: FailureType,
) -> Result<ImpactReport> {
    let asset = store::get_asset(db, asset_id)
        .await?
        .ok_or_else(|| OtInvError::AssetNotFound(asset_id.to_string()))?;
    let with_area = store::get_asset_with_area(db, asset_id).await?;
    let failing_asset = FailingAsset {
        id: asset.id.clone(),
        name: asset.name.clone(),
        asset_type: asset.asset_type,
        criticality: asset.criticality,
        process_area: with_area.and_then(|a| a.process_area),
        function: asset.function.clone(),
    };

    // Direct impact: every outgoing edge, any type, one hop.
    let mut directly_affected = Vec::new();
    let outgoing =
        store::list_relationships(db, RelationshipFilter::from_source(asset_id)).await?;
    for rel in outgoing {
        if let Some(target) = store::get_asset_with_area(db, &rel.target_asset_id).await? {
            directly_affected.push(DirectImpact {
                id: target.summary.id,
                name: target.summary.name,
                asset_type: target.summary.asset_type,
                criticality: target.summary.criticality,
                process_area: target.process_area,
                impact_type: rel.relationship_type,
                description: rel.description,
            });
        }
    }

    let deps = dependents::find_dependents(db, asset_id, DEFAULT_MAX_DEPTH).await?;
    let cascade_effects: Vec<CascadeEffect> = deps
        .into_iter()
        .map(|d| CascadeEffect {
            id: d.id,
            name: d.name,
            asset_type: d.asset_type,
            criticality: d.criticality,
            dependency_depth: d.depth,
            dependency_path: d.dependency_path.join(" → "),
        })
        .collect();

    let mut affected_ids: HashSet<String> = HashSet::new();
    affected_ids.insert(asset_id.to_string());
    affected_ids.extend(directly_affected.iter().map(|a| a.id.clone()));
    affected_ids.extend(cascade_effects.iter().map(|a| a.id.clone()));
    let affected_vec: Vec<String> = affected_ids.into_iter().collect();

    let affected_process_areas = store::process_area_names(db, &affected_vec).await?;

    let root_id = [asset_id.to_string()];
    let safety_implications = store::any_outgoing_of_type(
        db,
        &root_id,
        RelationshipType::SafetyInterlockFor,
    )
    .await?
        || store::any_outgoing_of_type(db, &affected_vec, RelationshipType::SafetyInterlockFor)
            .await?;

    let redundancy_details = redundancy::check_redundancy(db, asset_id).await?;

    let mut criticality_summary = CriticalitySummary::default();
    for a in &directly_affected {
        criticality_summary.count(a.criticality);
    }
    for a in &cascade_effects {
        criticality_summary.count(a.criticality);
    }

    let mut recommendations = Vec::new();
    if !redundancy_details.has_redundancy {
        recommendations.push(format!(
            "CRITICAL: {} has no redundancy configured",
            failing_asset.name
        ));
    }
    if criticality_summary.critical > 0 {
        recommendations.push(format!(
            "Failure would affect {} critical asset(s)",
            criticality_summary.critical
        ));
    }
    if safety_implications {
        recommendations
            .push("WARNING: Safety systems may be affected - review safety protocols".to_string());
    }
    if affected_process_areas.len() > 1 {
        recommendations.push(format!(
            "Impact spans {} process areas - coordinate response",
            affected_process_areas.len()
        ));
    }

    let directly_affected_count = directly_affected.len();
    let cascade_count = cascade_effects.len();
    Ok(ImpactReport {
        failing_asset,
        failure_type,
        total_affected: directly_affected_count + cascade_count,
        directly_affected,
        directly_affected_count,
        cascade_effects,
        cascade_count,
        affected_process_areas,
        criticality_summary,
        safety_implications,
        has_redundancy: redundancy_details.has_redundancy,
        redundancy_details,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_support::{insert_asset, insert_edge, test_db};
    use crate::db::Db;

    async fn insert_areas(db: &Db, areas: &[(&str, &str)]) {
        let rows: Vec<(String, String)> = areas
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect();
        db.with_connection(move |conn| {
            conn.execute_batch(
                "INSERT INTO environments (id, name, type) VALUES ('env1', 'Plant', 'manufacturing');
                 INSERT INTO sites (id, environment_id, name) VALUES ('site1', 'env1', 'Main Site');",
            )?;
            for (id, name) in &rows {
                conn.execute(
                    "INSERT INTO process_areas (id, site_id, name) VALUES (?1, 'site1', ?2)",
                    rusqlite::params![id, name],
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();
    }

    async fn assign_area(db: &Db, asset_id: &str, area_id: &str) {
        let asset_id = asset_id.to_string();
        let area_id = area_id.to_string();
        db.with_connection(move |conn| {
            conn.execute(
                "UPDATE assets SET process_area_id = ?1 WHERE id = ?2",
                rusqlite::params![area_id, asset_id],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_spof_score_and_level() {
        // critical base 100 + 2 dependents*10 + 1 critical*25 + 3 downstream*5 = 160
        assert_eq!(spof_risk_score(Criticality::Critical, 2, 1, 3), 160);
        assert_eq!(risk_level(160), Criticality::Critical);
        assert_eq!(risk_level(100), Criticality::High);
        assert_eq!(risk_level(99), Criticality::Medium);
        assert_eq!(risk_level(49), Criticality::Low);
        // Cap.
        assert_eq!(spof_risk_score(Criticality::Critical, 20, 10, 10), 200);
    }

    #[tokio::test]
    async fn test_find_spofs_scores_and_sorts() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC1", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "DEP1", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "DEP2", AssetType::Hmi, Some(Criticality::Medium)).await;
        insert_asset(&db, "V1", AssetType::Actuator, None).await;
        insert_asset(&db, "V2", AssetType::Actuator, None).await;
        insert_asset(&db, "V3", AssetType::Actuator, None).await;
        insert_edge(&db, "r1", "DEP1", "PLC1", RelationshipType::DependsOn).await;
        insert_edge(&db, "r2", "DEP2", "PLC1", RelationshipType::DependsOn).await;
        insert_edge(&db, "r3", "PLC1", "V1", RelationshipType::Controls).await;
        insert_edge(&db, "r4", "PLC1", "V2", RelationshipType::Controls).await;
        insert_edge(&db, "r5", "PLC1", "V3", RelationshipType::Controls).await;

        let spofs = find_spofs(&db, Criticality::High, None).await.unwrap();
        // DEP1 is critical but has no dependents and <=2 downstream edges.
        assert_eq!(spofs.len(), 1);
        let spof = &spofs[0];
        assert_eq!(spof.id, "PLC1");
        assert_eq!(spof.dependent_count, 2);
        assert_eq!(spof.critical_dependents, 1);
        assert_eq!(spof.downstream_count, 3);
        assert_eq!(spof.risk_score, 160);
        assert_eq!(spof.risk_level, Criticality::Critical);
        assert!(spof.recommendation.starts_with("URGENT"));
    }

    #[tokio::test]
    async fn test_redundant_assets_are_never_spofs() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC1", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "PLC1B", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "DEP", AssetType::Hmi, Some(Criticality::Critical)).await;
        insert_edge(&db, "r1", "PLC1", "PLC1B", RelationshipType::RedundantWith).await;
        insert_edge(&db, "r2", "DEP", "PLC1", RelationshipType::DependsOn).await;

        let spofs = find_spofs(&db, Criticality::High, None).await.unwrap();
        assert!(spofs.iter().all(|s| s.id != "PLC1"));
    }

    #[tokio::test]
    async fn test_find_spofs_scoped_to_process_area() {
        let (db, _temp) = test_db().await;
        insert_areas(&db, &[("pa-b", "Brewhouse"), ("pa-c", "Cellar")]).await;
        insert_asset(&db, "PLC-B", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "PLC-C", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "DEP-B", AssetType::Hmi, None).await;
        insert_asset(&db, "DEP-C", AssetType::Hmi, None).await;
        assign_area(&db, "PLC-B", "pa-b").await;
        assign_area(&db, "PLC-C", "pa-c").await;
        insert_edge(&db, "r1", "DEP-B", "PLC-B", RelationshipType::DependsOn).await;
        insert_edge(&db, "r2", "DEP-C", "PLC-C", RelationshipType::DependsOn).await;

        // Unscoped finds both candidates.
        let all = find_spofs(&db, Criticality::High, None).await.unwrap();
        assert_eq!(all.len(), 2);

        // Name fragment scopes to one area.
        let brewhouse = find_spofs(&db, Criticality::High, Some("Brew".to_string()))
            .await
            .unwrap();
        assert_eq!(brewhouse.len(), 1);
        assert_eq!(brewhouse[0].id, "PLC-B");
        assert_eq!(brewhouse[0].process_area.as_deref(), Some("Brewhouse"));

        // Exact area id scopes too.
        let cellar = find_spofs(&db, Criticality::High, Some("pa-c".to_string()))
            .await
            .unwrap();
        assert_eq!(cellar.len(), 1);
        assert_eq!(cellar[0].id, "PLC-C");
    }

    #[tokio::test]
    async fn test_impact_process_areas_dedup_and_span_note() {
        let (db, _temp) = test_db().await;
        insert_areas(&db, &[("pa-b", "Brewhouse"), ("pa-c", "Cellar")]).await;
        insert_asset(&db, "PLC1", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "V1", AssetType::Actuator, None).await;
        insert_asset(&db, "V2", AssetType::Actuator, None).await;
        insert_asset(&db, "DEP", AssetType::Server, None).await;
        assign_area(&db, "PLC1", "pa-b").await;
        assign_area(&db, "V1", "pa-b").await;
        assign_area(&db, "V2", "pa-b").await;
        assign_area(&db, "DEP", "pa-c").await;
        insert_edge(&db, "r1", "PLC1", "V1", RelationshipType::Controls).await;
        insert_edge(&db, "r2", "PLC1", "V2", RelationshipType::Controls).await;
        insert_edge(&db, "r3", "DEP", "PLC1", RelationshipType::DependsOn).await;

        let report = analyze_impact(&db, "PLC1", FailureType::Complete)
            .await
            .unwrap();
        // Three Brewhouse assets are affected but the area is listed once.
        assert_eq!(report.affected_process_areas, vec!["Brewhouse", "Cellar"]);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("spans 2 process areas")));
    }

    #[tokio::test]
    async fn test_unassigned_threshold_falls_back_to_high() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "M1", AssetType::Sensor, Some(Criticality::Medium)).await;
        insert_asset(&db, "D1", AssetType::Hmi, None).await;
        insert_edge(&db, "r1", "D1", "M1", RelationshipType::DependsOn).await;

        // Medium candidates are below the clamped threshold.
        let spofs = find_spofs(&db, Criticality::Unassigned, None).await.unwrap();
        assert!(spofs.is_empty());
        let spofs = find_spofs(&db, Criticality::Medium, None).await.unwrap();
        assert_eq!(spofs.len(), 1);
    }

    #[tokio::test]
    async fn test_impact_unknown_asset_is_not_found() {
        let (db, _temp) = test_db().await;
        let err = analyze_impact(&db, "GHOST", FailureType::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, OtInvError::AssetNotFound(_)));
    }

    #[tokio::test]
    async fn test_impact_report_shape() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "PLC1", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_asset(&db, "V1", AssetType::Actuator, Some(Criticality::High)).await;
        insert_asset(&db, "PLC2", AssetType::Controller, Some(Criticality::Critical)).await;
        insert_edge(&db, "r1", "PLC1", "V1", RelationshipType::Controls).await;
        insert_edge(&db, "r2", "PLC2", "PLC1", RelationshipType::DependsOn).await;
        insert_edge(&db, "r3", "PLC1", "V1", RelationshipType::SafetyInterlockFor).await;

        let report = analyze_impact(&db, "PLC1", FailureType::Complete)
            .await
            .unwrap();
        assert_eq!(report.failing_asset.id, "PLC1");
        // One direct entry per edge: V1 appears twice.
        assert_eq!(report.directly_affected_count, 2);
        assert_eq!(report.cascade_count, 1);
        assert_eq!(report.cascade_effects[0].dependency_path, "PLC1 → PLC2");
        assert_eq!(report.total_affected, 3);
        assert!(report.safety_implications);
        assert!(!report.has_redundancy);
        // Direct V1 counted twice (high x2) plus cascade PLC2 (critical).
        assert_eq!(report.criticality_summary.high, 2);
        assert_eq!(report.criticality_summary.critical, 1);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.starts_with("CRITICAL")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.starts_with("WARNING")));
    }
}
