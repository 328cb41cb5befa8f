//! Relationship-graph traversal and risk analysis.
//!
//! All walks are bounded breadth-first searches over the directed multigraph
//! of asset relationships. The graph is re-read from the store on every call;
//! nothing here caches adjacency or holds state between calls.

pub mod analysis;
pub mod dependents;
pub mod path;
pub mod redundancy;
pub mod traversal;

use crate::model::{AssetSummary, AssetType, Criticality};
use serde::Serialize;
use std::collections::BTreeMap;

/// Default hop bound for traversals when the caller does not supply one.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Which way edges are followed from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow edges in reverse: find assets that feed into the root.
    Upstream,
    /// Follow edges forward: find assets the root feeds.
    Downstream,
}

/// One asset reached by a bounded traversal, at the shallowest depth at
/// which BFS discovered it.
#[derive(Debug, Clone, Serialize)]
pub struct TraversedAsset {
    #[serde(flatten)]
    pub asset: AssetSummary,
    pub depth: usize,
}

/// Result of a bounded traversal. The root never appears in `assets`.
#[derive(Debug, Clone, Serialize)]
pub struct TraversalResult {
    pub root: String,
    pub assets: Vec<TraversedAsset>,
    pub depth_map: BTreeMap<String, usize>,
    pub max_depth_reached: usize,
}

/// An asset whose operation transitively depends on the traversal root,
/// with one shortest dependency chain from root to it.
#[derive(Debug, Clone, Serialize)]
pub struct Dependent {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub criticality: Criticality,
    pub depth: usize,
    pub dependency_path: Vec<String>,
}

/// A peer that provides redundancy or backup for an asset.
#[derive(Debug, Clone, Serialize)]
pub struct RedundancyPeer {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedundancyReport {
    pub asset_id: String,
    pub has_redundancy: bool,
    pub redundant_assets: Vec<RedundancyPeer>,
    pub backup_assets: Vec<RedundancyPeer>,
}
