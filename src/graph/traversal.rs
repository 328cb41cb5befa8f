//! Bounded BFS over asset relationships.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::db::store::{self, RelationshipFilter};
use crate::db::Db;
use crate::graph::{Direction, TraversalResult, TraversedAsset};
use crate::model::RelationshipType;
use crate::Result;

/// Breadth-first walk from `root_id`, following edges in `direction`,
/// optionally restricted to the given relationship types.
///
/// Returns visited assets in non-decreasing depth order, each at the
/// shallowest depth BFS reached it. The root is never included. `max_depth`
/// is inclusive: assets at exactly `max_depth` appear in the result but are
/// not expanded further. An unknown root yields an empty result, not an
/// error.
pub async fn traverse(
    db: &Db,
    root_id: &str,
    direction: Direction,
    relationship_types: Option<Vec<RelationshipType>>,
    max_depth: usize,
) -> Result<TraversalResult> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut assets = Vec::new();
    let mut depth_map = BTreeMap::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((root_id.to_string(), 0));

    while let Some((current_id, depth)) = queue.pop_front() {
        // Over-depth entries are discarded at dequeue, so enqueues at
        // max_depth + 1 are tolerated but never expanded.
        if visited.contains(&current_id) || depth > max_depth {
            continue;
        }
        visited.insert(current_id.clone());

        if current_id != root_id {
            if let Some(summary) = store::get_asset_summary(db, &current_id).await? {
                depth_map.insert(current_id.clone(), depth);
                assets.push(TraversedAsset {
                    asset: summary,
                    depth,
                });
            }
        }

        let edges = neighbors(db, &current_id, direction, &relationship_types).await?;
        for neighbor_id in edges {
            if !visited.contains(&neighbor_id) {
                queue.push_back((neighbor_id, depth + 1));
            }
        }
    }

    Ok(TraversalResult {
        root: root_id.to_string(),
        assets,
        depth_map,
        max_depth_reached: max_depth,
    })
}

/// Neighbor ids of one node in the requested direction, one relationship
/// row per multigraph edge (duplicates are harmless, BFS dedups on visit).
async fn neighbors(
    db: &Db,
    asset_id: &str,
    direction: Direction,
    relationship_types: &Option<Vec<RelationshipType>>,
) -> Result<Vec<String>> {
    let base = match direction {
        Direction::Downstream => RelationshipFilter::from_source(asset_id),
        Direction::Upstream => RelationshipFilter::to_target(asset_id),
    };

    let mut out = Vec::new();
    match relationship_types {
        // The store filter takes one type at a time; query per type and
        // keep relationship-id order within each.
        Some(types) => {
            for rel_type in types {
                let filter = base.clone().of_type(*rel_type);
                for rel in store::list_relationships(db, filter).await? {
                    out.push(pick_endpoint(direction, rel.source_asset_id, rel.target_asset_id));
                }
            }
        }
        None => {
            for rel in store::list_relationships(db, base).await? {
                out.push(pick_endpoint(direction, rel.source_asset_id, rel.target_asset_id));
            }
        }
    }
    Ok(out)
}

fn pick_endpoint(direction: Direction, source: String, target: String) -> String {
    match direction {
        Direction::Downstream => target,
        Direction::Upstream => source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_support::{insert_asset, insert_edge, test_db};
    use crate::graph::DEFAULT_MAX_DEPTH;
    use crate::model::AssetType;

    #[tokio::test]
    async fn test_downstream_excludes_root_and_orders_by_depth() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "S1", AssetType::Sensor, None).await;
        insert_asset(&db, "PLC", AssetType::Controller, None).await;
        insert_asset(&db, "V1", AssetType::Actuator, None).await;
        insert_edge(&db, "r1", "S1", "PLC", RelationshipType::FeedsDataTo).await;
        insert_edge(&db, "r2", "PLC", "V1", RelationshipType::Controls).await;

        let result = traverse(&db, "S1", Direction::Downstream, None, DEFAULT_MAX_DEPTH)
            .await
            .unwrap();
        assert_eq!(result.root, "S1");
        let ids: Vec<(&str, usize)> = result
            .assets
            .iter()
            .map(|a| (a.asset.id.as_str(), a.depth))
            .collect();
        assert_eq!(ids, vec![("PLC", 1), ("V1", 2)]);
        assert_eq!(result.depth_map.get("V1"), Some(&2));
    }

    #[tokio::test]
    async fn test_upstream_follows_edges_in_reverse() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "S1", AssetType::Sensor, None).await;
        insert_asset(&db, "PLC", AssetType::Controller, None).await;
        insert_edge(&db, "r1", "S1", "PLC", RelationshipType::FeedsDataTo).await;

        let result = traverse(&db, "PLC", Direction::Upstream, None, DEFAULT_MAX_DEPTH)
            .await
            .unwrap();
        assert_eq!(result.assets.len(), 1);
        assert_eq!(result.assets[0].asset.id, "S1");

        // Forward from PLC finds nothing upstream of it.
        let forward = traverse(&db, "PLC", Direction::Downstream, None, DEFAULT_MAX_DEPTH)
            .await
            .unwrap();
        assert!(forward.assets.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_terminates_without_revisiting_root() {
        let (db, _temp) = test_db().await;
        for id in ["A", "B", "C"] {
            insert_asset(&db, id, AssetType::Controller, None).await;
        }
        insert_edge(&db, "r1", "A", "B", RelationshipType::CommunicatesWith).await;
        insert_edge(&db, "r2", "B", "C", RelationshipType::CommunicatesWith).await;
        insert_edge(&db, "r3", "C", "A", RelationshipType::CommunicatesWith).await;

        let result = traverse(&db, "A", Direction::Downstream, None, DEFAULT_MAX_DEPTH)
            .await
            .unwrap();
        let ids: Vec<(&str, usize)> = result
            .assets
            .iter()
            .map(|a| (a.asset.id.as_str(), a.depth))
            .collect();
        assert_eq!(ids, vec![("B", 1), ("C", 2)]);
    }

    #[tokio::test]
    async fn test_max_depth_is_inclusive() {
        let (db, _temp) = test_db().await;
        for id in ["A", "B", "C", "D"] {
            insert_asset(&db, id, AssetType::Switch, None).await;
        }
        insert_edge(&db, "r1", "A", "B", RelationshipType::CommunicatesWith).await;
        insert_edge(&db, "r2", "B", "C", RelationshipType::CommunicatesWith).await;
        insert_edge(&db, "r3", "C", "D", RelationshipType::CommunicatesWith).await;

        let result = traverse(&db, "A", Direction::Downstream, None, 2)
            .await
            .unwrap();
        let ids: Vec<&str> = result.assets.iter().map(|a| a.asset.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
        assert!(result.assets.iter().all(|a| a.depth >= 1 && a.depth <= 2));
    }

    #[tokio::test]
    async fn test_type_filter_restricts_expansion() {
        let (db, _temp) = test_db().await;
        for id in ["A", "B", "C"] {
            insert_asset(&db, id, AssetType::Controller, None).await;
        }
        insert_edge(&db, "r1", "A", "B", RelationshipType::Controls).await;
        insert_edge(&db, "r2", "A", "C", RelationshipType::Powers).await;

        let result = traverse(
            &db,
            "A",
            Direction::Downstream,
            Some(vec![RelationshipType::Controls]),
            DEFAULT_MAX_DEPTH,
        )
        .await
        .unwrap();
        let ids: Vec<&str> = result.assets.iter().map(|a| a.asset.id.as_str()).collect();
        assert_eq!(ids, vec!["B"]);
    }

    #[tokio::test]
    async fn test_unknown_root_yields_empty_result() {
        let (db, _temp) = test_db().await;
        let result = traverse(&db, "GHOST", Direction::Downstream, None, DEFAULT_MAX_DEPTH)
            .await
            .unwrap();
        assert!(result.assets.is_empty());
    }

    #[tokio::test]
    async fn test_multigraph_edges_do_not_duplicate_assets() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "A", AssetType::Controller, None).await;
        insert_asset(&db, "B", AssetType::Actuator, None).await;
        insert_edge(&db, "r1", "A", "B", RelationshipType::Controls).await;
        insert_edge(&db, "r2", "A", "B", RelationshipType::Powers).await;

        let result = traverse(&db, "A", Direction::Downstream, None, DEFAULT_MAX_DEPTH)
            .await
            .unwrap();
        assert_eq!(result.assets.len(), 1);
    }
}
