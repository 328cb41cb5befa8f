//! Typed records for the inventory: assets, relationships, review flags.
//!
//! Everything that crosses the store boundary is parsed into these types;
//! the traversal and scoring code never sees raw rows.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// Kind of OT device or system component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetType {
    Controller,
    #[serde(rename = "HMI")]
    Hmi,
    Sensor,
    Actuator,
    #[serde(rename = "RemoteIO")]
    RemoteIo,
    Gateway,
    Switch,
    Server,
    Workstation,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Controller => "Controller",
            AssetType::Hmi => "HMI",
            AssetType::Sensor => "Sensor",
            AssetType::Actuator => "Actuator",
            AssetType::RemoteIo => "RemoteIO",
            AssetType::Gateway => "Gateway",
            AssetType::Switch => "Switch",
            AssetType::Server => "Server",
            AssetType::Workstation => "Workstation",
        }
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Controller" => Ok(AssetType::Controller),
            "HMI" => Ok(AssetType::Hmi),
            "Sensor" => Ok(AssetType::Sensor),
            "Actuator" => Ok(AssetType::Actuator),
            "RemoteIO" => Ok(AssetType::RemoteIo),
            "Gateway" => Ok(AssetType::Gateway),
            "Switch" => Ok(AssetType::Switch),
            "Server" => Ok(AssetType::Server),
            "Workstation" => Ok(AssetType::Workstation),
            other => Err(format!("unknown asset type: {}", other)),
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered severity classification: critical > high > medium > low > unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    High,
    Medium,
    Low,
    Unassigned,
}

impl Criticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Criticality::Critical => "critical",
            Criticality::High => "high",
            Criticality::Medium => "medium",
            Criticality::Low => "low",
            Criticality::Unassigned => "unassigned",
        }
    }

    /// Rank for ordering: lower is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Criticality::Critical => 0,
            Criticality::High => 1,
            Criticality::Medium => 2,
            Criticality::Low => 3,
            Criticality::Unassigned => 4,
        }
    }

    /// True if this criticality is at or above (at least as severe as) `threshold`.
    pub fn at_or_above(&self, threshold: Criticality) -> bool {
        self.rank() <= threshold.rank()
    }

    /// Levels at or above the given threshold, most severe first.
    /// Used to build `IN (...)` filters against the store.
    pub fn levels_at_or_above(threshold: Criticality) -> Vec<Criticality> {
        [
            Criticality::Critical,
            Criticality::High,
            Criticality::Medium,
            Criticality::Low,
        ]
        .into_iter()
        .filter(|c| c.at_or_above(threshold))
        .collect()
    }
}

impl FromStr for Criticality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Criticality::Critical),
            "high" => Ok(Criticality::High),
            "medium" => Ok(Criticality::Medium),
            "low" => Ok(Criticality::Low),
            "unassigned" => Ok(Criticality::Unassigned),
            other => Err(format!("unknown criticality: {}", other)),
        }
    }
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed directed edge kinds between assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    FeedsDataTo,
    Controls,
    Monitors,
    SafetyInterlockFor,
    DependsOn,
    RedundantWith,
    CommunicatesWith,
    Powers,
    BacksUp,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::FeedsDataTo => "feeds_data_to",
            RelationshipType::Controls => "controls",
            RelationshipType::Monitors => "monitors",
            RelationshipType::SafetyInterlockFor => "safety_interlock_for",
            RelationshipType::DependsOn => "depends_on",
            RelationshipType::RedundantWith => "redundant_with",
            RelationshipType::CommunicatesWith => "communicates_with",
            RelationshipType::Powers => "powers",
            RelationshipType::BacksUp => "backs_up",
        }
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "feeds_data_to" => Ok(RelationshipType::FeedsDataTo),
            "controls" => Ok(RelationshipType::Controls),
            "monitors" => Ok(RelationshipType::Monitors),
            "safety_interlock_for" => Ok(RelationshipType::SafetyInterlockFor),
            "depends_on" => Ok(RelationshipType::DependsOn),
            "redundant_with" => Ok(RelationshipType::RedundantWith),
            "communicates_with" => Ok(RelationshipType::CommunicatesWith),
            "powers" => Ok(RelationshipType::Powers),
            "backs_up" => Ok(RelationshipType::BacksUp),
            other => Err(format!("unknown relationship type: {}", other)),
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure scenario for impact analysis. Carried as metadata only;
/// it does not alter the traversal or scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    #[default]
    Complete,
    Degraded,
    Intermittent,
}

impl FromStr for FailureType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "complete" => Ok(FailureType::Complete),
            "degraded" => Ok(FailureType::Degraded),
            "intermittent" => Ok(FailureType::Intermittent),
            other => Err(format!("unknown failure type: {}", other)),
        }
    }
}

/// Review flag kinds for human validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    MissingData,
    NeedsVerification,
    PotentialIssue,
    SuggestedRelationship,
    ComplianceGap,
    OwnershipUnknown,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::MissingData => "missing_data",
            FlagType::NeedsVerification => "needs_verification",
            FlagType::PotentialIssue => "potential_issue",
            FlagType::SuggestedRelationship => "suggested_relationship",
            FlagType::ComplianceGap => "compliance_gap",
            FlagType::OwnershipUnknown => "ownership_unknown",
        }
    }
}

impl FromStr for FlagType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "missing_data" => Ok(FlagType::MissingData),
            "needs_verification" => Ok(FlagType::NeedsVerification),
            "potential_issue" => Ok(FlagType::PotentialIssue),
            "suggested_relationship" => Ok(FlagType::SuggestedRelationship),
            "compliance_gap" => Ok(FlagType::ComplianceGap),
            "ownership_unknown" => Ok(FlagType::OwnershipUnknown),
            other => Err(format!("unknown flag type: {}", other)),
        }
    }
}

/// Review flag lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Open,
    InReview,
    Resolved,
    Dismissed,
}

impl FlagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagStatus::Open => "open",
            FlagStatus::InReview => "in_review",
            FlagStatus::Resolved => "resolved",
            FlagStatus::Dismissed => "dismissed",
        }
    }
}

impl FromStr for FlagStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(FlagStatus::Open),
            "in_review" => Ok(FlagStatus::InReview),
            "resolved" => Ok(FlagStatus::Resolved),
            "dismissed" => Ok(FlagStatus::Dismissed),
            other => Err(format!("unknown flag status: {}", other)),
        }
    }
}

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse::<$ty>()
                    .map_err(|e| FromSqlError::Other(e.into()))
            }
        }
    };
}

sql_text_enum!(AssetType);
sql_text_enum!(Criticality);
sql_text_enum!(RelationshipType);
sql_text_enum!(FlagType);
sql_text_enum!(FlagStatus);

/// Full asset record as stored in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub site_id: Option<String>,
    pub process_area_id: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub vlan: Option<i64>,
    #[serde(default)]
    pub protocols: Vec<String>,
    pub function: Option<String>,
    pub owner: Option<String>,
    pub maintainer: Option<String>,
    pub last_verified: Option<String>,
    #[serde(default)]
    pub in_cmms: bool,
    #[serde(default)]
    pub documented: bool,
    #[serde(default)]
    pub security_policy_applied: bool,
    #[serde(default = "default_criticality")]
    pub criticality: Criticality,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_criticality() -> Criticality {
    Criticality::Unassigned
}

/// Slim asset view carried through traversal results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub criticality: Criticality,
    pub process_area_id: Option<String>,
}

/// A directed edge between two assets. The relationship set forms a
/// directed multigraph; two assets may be connected by several edges of
/// different types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_asset_id: String,
    pub target_asset_id: String,
    pub relationship_type: RelationshipType,
    pub inferred: bool,
    pub verified: bool,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criticality_ordering() {
        assert!(Criticality::Critical.at_or_above(Criticality::High));
        assert!(Criticality::High.at_or_above(Criticality::High));
        assert!(!Criticality::Medium.at_or_above(Criticality::High));
        assert!(!Criticality::Unassigned.at_or_above(Criticality::Low));
    }

    #[test]
    fn test_levels_at_or_above() {
        let levels = Criticality::levels_at_or_above(Criticality::High);
        assert_eq!(levels, vec![Criticality::Critical, Criticality::High]);
        let all = Criticality::levels_at_or_above(Criticality::Low);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_relationship_type_round_trip() {
        for s in [
            "feeds_data_to",
            "controls",
            "monitors",
            "safety_interlock_for",
            "depends_on",
            "redundant_with",
            "communicates_with",
            "powers",
            "backs_up",
        ] {
            let t: RelationshipType = s.parse().unwrap();
            assert_eq!(t.as_str(), s);
        }
        assert!("routes_to".parse::<RelationshipType>().is_err());
    }

    #[test]
    fn test_asset_type_serde_names() {
        let t: AssetType = serde_json::from_str("\"RemoteIO\"").unwrap();
        assert_eq!(t, AssetType::RemoteIo);
        assert_eq!(serde_json::to_string(&AssetType::Hmi).unwrap(), "\"HMI\"");
    }

    #[test]
    fn test_failure_type_default() {
        assert_eq!(FailureType::default(), FailureType::Complete);
        let t: FailureType = serde_json::from_str("\"degraded\"").unwrap();
        assert_eq!(t, FailureType::Degraded);
    }
}
