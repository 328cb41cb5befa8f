//! Dependency chain discovery: who breaks when this asset fails.

use std::collections::{HashSet, VecDeque};

use crate::db::store::{self, RelationshipFilter};
use crate::db::Db;
use crate::graph::Dependent;
use crate::model::RelationshipType;
use crate::Result;

/// Find all assets that depend on `asset_id`, directly or transitively,
/// by following `depends_on` edges in reverse: X is a dependent of Y when
/// `X --depends_on--> Y`, so failure of Y propagates to X.
///
/// Each result carries one shortest dependency chain from `asset_id`
/// (inclusive) to the dependent (inclusive). Ties between equal-length
/// chains are broken by relationship-row order, which is stable.
pub async fn find_dependents(db: &Db, asset_id: &str, max_depth: usize) -> Result<Vec<Dependent>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut dependents = Vec::new();
    // Queue entries carry the path walked so far, root exclusive.
    let mut queue: VecDeque<(String, usize, Vec<String>)> = VecDeque::new();
    queue.push_back((asset_id.to_string(), 0, Vec::new()));

    while let Some((current_id, depth, path)) = queue.pop_front() {
        if visited.contains(&current_id) || depth > max_depth {
            continue;
        }
        visited.insert(current_id.clone());

        let mut current_path = path;
        current_path.push(current_id.clone());

        if current_id != asset_id {
            if let Some(summary) = store::get_asset_summary(db, &current_id).await? {
                dependents.push(Dependent {
                    id: summary.id,
                    name: summary.name,
                    asset_type: summary.asset_type,
                    criticality: summary.criticality,
                    depth,
                    dependency_path: current_path.clone(),
                });
            }
        }

        let incoming = store::list_relationships(
            db,
            RelationshipFilter::to_target(&current_id).of_type(RelationshipType::DependsOn),
        )
        .await?;
        for rel in incoming {
            if !visited.contains(&rel.source_asset_id) {
                queue.push_back((rel.source_asset_id, depth + 1, current_path.clone()));
            }
        }
    }

    Ok(dependents)
}
