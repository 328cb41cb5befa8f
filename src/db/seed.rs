//! Sample-data seeding from a JSON fixture.
//!
//! Seeding is idempotent: if the assets table already has rows the fixture
//! is left alone, so restarting the server never duplicates data.

use crate::db::Db;
use crate::error::{OtInvError, Result};
use crate::model::{Asset, Criticality};
use log::info;
use rusqlite::params;
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct SeedEnvironment {
    id: String,
    name: String,
    #[serde(rename = "type")]
    env_type: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedSite {
    id: String,
    environment_id: String,
    name: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedProcessArea {
    id: String,
    site_id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    function: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedRelationship {
    #[serde(default)]
    id: Option<String>,
    source_asset_id: String,
    target_asset_id: String,
    relationship_type: crate::model::RelationshipType,
    #[serde(default)]
    inferred: bool,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SeedData {
    #[serde(default)]
    environments: Vec<SeedEnvironment>,
    #[serde(default)]
    sites: Vec<SeedSite>,
    #[serde(default)]
    process_areas: Vec<SeedProcessArea>,
    #[serde(default)]
    assets: Vec<Asset>,
    #[serde(default)]
    relationships: Vec<SeedRelationship>,
}

// Unassigned is represented as NULL in the store.
fn stored_criticality(criticality: Criticality) -> Option<Criticality> {
    match criticality {
        Criticality::Unassigned => None,
        c => Some(c),
    }
}

/// Load the JSON fixture at `data_path` into the database, unless assets
/// already exist. Returns the number of assets inserted.
pub async fn seed_sample_data(db: &Db, data_path: &Path) -> Result<usize> {
    let existing: i64 = db
        .with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?)
        })
        .await?;
    if existing > 0 {
        info!("database already has {} assets, skipping seed", existing);
        return Ok(0);
    }

    if !data_path.exists() {
        info!("seed fixture {} not found, starting empty", data_path.display());
        return Ok(0);
    }

    let raw = std::fs::read_to_string(data_path)?;
    let data: SeedData = serde_json::from_str(&raw)
        .map_err(|e| OtInvError::Parse(format!("invalid seed fixture: {}", e)))?;

    let asset_count = data.assets.len();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        for env in &data.environments {
            tx.execute(
                "INSERT OR IGNORE INTO environments (id, name, type, description) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![env.id, env.name, env.env_type, env.description],
            )?;
        }
        for site in &data.sites {
            tx.execute(
                "INSERT OR IGNORE INTO sites (id, environment_id, name, address, timezone) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![site.id, site.environment_id, site.name, site.address, site.timezone],
            )?;
        }
        for pa in &data.process_areas {
            tx.execute(
                "INSERT OR IGNORE INTO process_areas (id, site_id, name, description, function) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![pa.id, pa.site_id, pa.name, pa.description, pa.function],
            )?;
        }
        for asset in &data.assets {
            let protocols = serde_json::to_string(&asset.protocols)
                .map_err(|e| OtInvError::Parse(e.to_string()))?;
            let tags = serde_json::to_string(&asset.tags)
                .map_err(|e| OtInvError::Parse(e.to_string()))?;
            tx.execute(
                "INSERT OR IGNORE INTO assets (\
                     id, name, type, manufacturer, model, serial_number, firmware_version, \
                     site_id, process_area_id, ip_address, mac_address, vlan, protocols, \
                     function, owner, maintainer, last_verified, \
                     in_cmms, documented, security_policy_applied, criticality, notes, tags\
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, \
                           ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
                params![
                    asset.id,
                    asset.name,
                    asset.asset_type,
                    asset.manufacturer,
                    asset.model,
                    asset.serial_number,
                    asset.firmware_version,
                    asset.site_id,
                    asset.process_area_id,
                    asset.ip_address,
                    asset.mac_address,
                    asset.vlan,
                    protocols,
                    asset.function,
                    asset.owner,
                    asset.maintainer,
                    asset.last_verified,
                    asset.in_cmms,
                    asset.documented,
                    asset.security_policy_applied,
                    stored_criticality(asset.criticality),
                    asset.notes,
                    tags,
                ],
            )?;
        }
        for rel in &data.relationships {
            let rel_id = rel
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            tx.execute(
                "INSERT OR IGNORE INTO relationships (\
                     id, source_asset_id, target_asset_id, relationship_type, \
                     inferred, verified, description\
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rel_id,
                    rel.source_asset_id,
                    rel.target_asset_id,
                    rel.relationship_type,
                    rel.inferred,
                    rel.verified,
                    rel.description,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    })
    .await?;

    info!("seeded {} assets from fixture", asset_count);
    Ok(asset_count)
}
