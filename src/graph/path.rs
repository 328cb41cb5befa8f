//! Shortest-path search over the undirected view of the graph.

use std::collections::{HashSet, VecDeque};

use crate::db::store::{self, RelationshipFilter};
use crate::db::Db;
use crate::model::{AssetType, Criticality, RelationshipType};
use crate::{OtInvError, Result};

#[derive(Debug, Clone, serde::Serialize)]
pub struct PathNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub criticality: Criticality,
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_to_next: Option<RelationshipType>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PathResult {
    pub found: bool,
    pub path_length: usize,
    pub path: Vec<PathNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// BFS for a shortest path between two assets, ignoring edge direction:
/// from any node, both outgoing targets and incoming sources are
/// candidate next hops.
///
/// Hop labels are resolved by looking up a relationship in the
/// source-to-target direction of the path only; a hop that travelled an
/// edge backwards finds no label and stays unlabeled.
pub async fn find_path(db: &Db, source_id: &str, target_id: &str) -> Result<PathResult> {
    for id in [source_id, target_id] {
        if !store::asset_exists(db, id).await? {
            return Err(OtInvError::AssetNotFound(id.to_string()));
        }
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, Vec<String>)> = VecDeque::new();
    queue.push_back((source_id.to_string(), vec![source_id.to_string()]));

    while let Some((current_id, path)) = queue.pop_front() {
        if current_id == target_id {
            return build_path_result(db, &path).await;
        }
        if visited.contains(&current_id) {
            continue;
        }
        visited.insert(current_id.clone());

        for neighbor_id in undirected_neighbors(db, &current_id).await? {
            if !visited.contains(&neighbor_id) {
                let mut next_path = path.clone();
                next_path.push(neighbor_id.clone());
                queue.push_back((neighbor_id, next_path));
            }
        }
    }

    Ok(PathResult {
        found: false,
        path_length: 0,
        path: Vec::new(),
        message: Some(format!(
            "No path found between {} and {}",
            source_id, target_id
        )),
    })
}

async fn undirected_neighbors(db: &Db, asset_id: &str) -> Result<Vec<String>> {
    let mut neighbors = Vec::new();
    for rel in store::list_relationships(db, RelationshipFilter::from_source(asset_id)).await? {
        neighbors.push(rel.target_asset_id);
    }
    for rel in store::list_relationships(db, RelationshipFilter::to_target(asset_id)).await? {
        neighbors.push(rel.source_asset_id);
    }
    Ok(neighbors)
}

async fn build_path_result(db: &Db, path: &[String]) -> Result<PathResult> {
    let mut nodes = Vec::new();
    for (position, asset_id) in path.iter().enumerate() {
        let summary = match store::get_asset_summary(db, asset_id).await? {
            Some(s) => s,
            None => continue,
        };

        let relationship_to_next = match path.get(position + 1) {
            Some(next_id) => {
                let filter = RelationshipFilter {
                    source_id: Some(asset_id.clone()),
                    target_id: Some(next_id.clone()),
                    relationship_type: None,
                };
                store::list_relationships(db, filter)
                    .await?
                    .first()
                    .map(|r| r.relationship_type)
            }
            None => None,
        };

        nodes.push(PathNode {
            id: summary.id,
            name: summary.name,
            asset_type: summary.asset_type,
            criticality: summary.criticality,
            position,
            relationship_to_next,
        });
    }

    Ok(PathResult {
        found: true,
        path_length: path.len(),
        path: nodes,
        message: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_support::{insert_asset, insert_edge, test_db};

    #[tokio::test]
    async fn test_forward_path_with_labels() {
        let (db, _temp) = test_db().await;
        for id in ["S1", "PLC", "V1"] {
            insert_asset(&db, id, AssetType::Controller, None).await;
        }
        insert_edge(&db, "r1", "S1", "PLC", RelationshipType::FeedsDataTo).await;
        insert_edge(&db, "r2", "PLC", "V1", RelationshipType::Controls).await;

        let result = find_path(&db, "S1", "V1").await.unwrap();
        assert!(result.found);
        assert_eq!(result.path_length, 3);
        let ids: Vec<&str> = result.path.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "PLC", "V1"]);
        assert_eq!(
            result.path[0].relationship_to_next,
            Some(RelationshipType::FeedsDataTo)
        );
        assert_eq!(
            result.path[1].relationship_to_next,
            Some(RelationshipType::Controls)
        );
        assert!(result.path[2].relationship_to_next.is_none());
    }

    #[tokio::test]
    async fn test_reverse_hop_is_unlabeled() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "A", AssetType::Controller, None).await;
        insert_asset(&db, "B", AssetType::Controller, None).await;
        // Edge points B -> A, path travels A -> B.
        insert_edge(&db, "r1", "B", "A", RelationshipType::DependsOn).await;

        let result = find_path(&db, "A", "B").await.unwrap();
        assert!(result.found);
        assert_eq!(result.path.len(), 2);
        assert!(result.path[0].relationship_to_next.is_none());
    }

    #[tokio::test]
    async fn test_disconnected_components() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "A", AssetType::Controller, None).await;
        insert_asset(&db, "B", AssetType::Controller, None).await;

        let result = find_path(&db, "A", "B").await.unwrap();
        assert!(!result.found);
        assert!(result.path.is_empty());
        assert!(result.message.is_some());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_not_found() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "A", AssetType::Controller, None).await;

        let err = find_path(&db, "A", "GHOST").await.unwrap_err();
        assert!(matches!(err, OtInvError::AssetNotFound(_)));
    }

    #[tokio::test]
    async fn test_source_equals_target() {
        let (db, _temp) = test_db().await;
        insert_asset(&db, "A", AssetType::Controller, None).await;

        let result = find_path(&db, "A", "A").await.unwrap();
        assert!(result.found);
        assert_eq!(result.path_length, 1);
    }
}
