//! Single-hop redundancy detection.

use crate::db::store::{self, RelationshipFilter};
use crate::db::Db;
use crate::graph::{RedundancyPeer, RedundancyReport};
use crate::model::RelationshipType;
use crate::Result;

/// Report whether `asset_id` has redundancy configured.
///
/// `redundant_with` is treated as symmetric even though edges are stored
/// directionally: a peer on either end of such an edge counts. Backup
/// coverage only counts edges targeting `asset_id` (X backs up this asset
/// when `X --backs_up--> asset_id`). Single-hop, no depth limit applies.
pub async fn check_redundancy(db: &Db, asset_id: &str) -> Result<RedundancyReport> {
    let mut redundant_assets = Vec::new();

    let outgoing = store::list_relationships(
        db,
        RelationshipFilter::from_source(asset_id).of_type(RelationshipType::RedundantWith),
    )
    .await?;
    let incoming = store::list_relationships(
        db,
        RelationshipFilter::to_target(asset_id).of_type(RelationshipType::RedundantWith),
    )
    .await?;

    for rel in outgoing.into_iter().chain(incoming) {
        let other_id = if rel.source_asset_id == asset_id {
            rel.target_asset_id
        } else {
            rel.source_asset_id
        };
        // Self-loop edges carry no redundancy.
        if other_id == asset_id {
            continue;
        }
        if let Some(summary) = store::get_asset_summary(db, &other_id).await? {
            redundant_assets.push(RedundancyPeer {
                id: summary.id,
                name: summary.name,
                asset_type: summary.asset_type,
                verified: Some(rel.verified),
            });
        }
    }

    let mut backup_assets = Vec::new();
    let backups = store::list_relationships(
        db,
        RelationshipFilter::to_target(asset_id).of_type(RelationshipType::BacksUp),
    )
    .await?;
    for rel in backups {
        if let Some(summary) = store::get_asset_summary(db, &rel.source_asset_id).await? {
            backup_assets.push(RedundancyPeer {
                id: summary.id,
                name: summary.name,
                asset_type: summary.asset_type,
                verified: None,
            });
        }
    }

    Ok(RedundancyReport {
        asset_id: asset_id.to_string(),
        has_redundancy: !redundant_assets.is_empty() || !backup_assets.is_empty(),
        redundant_assets,
        backup_assets,
    })
}
