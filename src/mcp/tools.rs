//! Tool catalog and shared handler helpers.

use crate::error::Result;
use crate::mcp::types::{ContentItem, Tool, ToolsCallResult};
use serde::Serialize;
use serde_json::json;

/// Wrap a serializable report as a successful tool result (pretty JSON text).
pub(crate) fn json_result<T: Serialize>(value: &T) -> Result<ToolsCallResult> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| crate::OtInvError::Parse(format!("result serialization: {}", e)))?;
    Ok(ToolsCallResult {
        content: vec![ContentItem {
            content_type: "text".to_string(),
            text,
        }],
        is_error: None,
    })
}

/// Tool-level error surfaced to the model as content rather than a protocol
/// failure (unknown assets, invalid enum values and the like).
pub(crate) fn error_result(message: impl Into<String>) -> ToolsCallResult {
    ToolsCallResult {
        content: vec![ContentItem {
            content_type: "text".to_string(),
            text: message.into(),
        }],
        is_error: Some(true),
    }
}

pub(crate) fn clamp_limit(limit: usize, max: usize) -> usize {
    limit.min(max)
}

/// Criticality ordering for SQL, most critical first. SQLite has no enum
/// ordering, so rank with a CASE over the stored text.
pub(crate) const CRITICALITY_RANK_SQL: &str = "CASE a.criticality \
     WHEN 'critical' THEN 1 WHEN 'high' THEN 2 WHEN 'medium' THEN 3 \
     WHEN 'low' THEN 4 ELSE 5 END";

/// All tool definitions for tools/list.
pub fn get_tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "list_assets".to_string(),
            description: "List OT assets with optional filtering by type, process area, site, criticality, owner, or compliance gaps".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "asset_type": {
                        "type": "string",
                        "description": "Filter by asset type",
                        "enum": ["Controller", "HMI", "Sensor", "Actuator", "RemoteIO", "Gateway", "Switch", "Server", "Workstation"]
                    },
                    "process_area": {
                        "type": "string",
                        "description": "Filter by process area name or ID"
                    },
                    "site": {
                        "type": "string",
                        "description": "Filter by site name or ID"
                    },
                    "criticality": {
                        "type": "string",
                        "description": "Filter by criticality level",
                        "enum": ["critical", "high", "medium", "low"]
                    },
                    "owner": {
                        "type": "string",
                        "description": "Filter by owner name"
                    },
                    "has_gaps": {
                        "type": "boolean",
                        "description": "Only return assets with compliance gaps"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default 50, max 100)",
                        "default": 50
                    }
                }
            }),
        },
        Tool {
            name: "get_asset".to_string(),
            description: "Get detailed information about a specific asset including relationships, open review flags, and compliance status".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "asset_id": {
                        "type": "string",
                        "description": "The unique identifier of the asset"
                    }
                },
                "required": ["asset_id"]
            }),
        },
        Tool {
            name: "search_assets".to_string(),
            description: "Search assets by text query across name, manufacturer, model, notes, function, and ID".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search text"
                    },
                    "fields": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Specific fields to search (optional)"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default 20, max 50)",
                        "default": 20
                    }
                },
                "required": ["query"]
            }),
        },
        Tool {
            name: "get_upstream".to_string(),
            description: "Get all assets upstream of the specified asset - assets that feed data into it. Example: \"What feeds data to PLC-101?\"".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "asset_id": {
                        "type": "string",
                        "description": "Starting asset ID"
                    },
                    "relationship_types": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Filter by relationship types (e.g., feeds_data_to, monitors)"
                    },
                    "max_depth": {
                        "type": "integer",
                        "description": "Maximum traversal depth (default 5)",
                        "default": 5
                    }
                },
                "required": ["asset_id"]
            }),
        },
        Tool {
            name: "get_downstream".to_string(),
            description: "Get all assets downstream of the specified asset - assets that it feeds data to or controls. Example: \"What does PLC-101 control?\"".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "asset_id": {
                        "type": "string",
                        "description": "Starting asset ID"
                    },
                    "relationship_types": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Filter by relationship types (e.g., controls, feeds_data_to)"
                    },
                    "max_depth": {
                        "type": "integer",
                        "description": "Maximum traversal depth (default 5)",
                        "default": 5
                    }
                },
                "required": ["asset_id"]
            }),
        },
        Tool {
            name: "get_dependencies".to_string(),
            description: "Get complete dependency map for an asset - upstream, downstream, explicit depends_on links, dependents, and redundancy".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "asset_id": {
                        "type": "string",
                        "description": "Asset to analyze"
                    },
                    "max_depth": {
                        "type": "integer",
                        "description": "Maximum traversal depth",
                        "default": 5
                    }
                },
                "required": ["asset_id"]
            }),
        },
        Tool {
            name: "list_relationships".to_string(),
            description: "List relationships with optional filtering by source, target, type, or verification status".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "source_asset_id": {
                        "type": "string",
                        "description": "Filter by source asset"
                    },
                    "target_asset_id": {
                        "type": "string",
                        "description": "Filter by target asset"
                    },
                    "relationship_type": {
                        "type": "string",
                        "description": "Filter by relationship type"
                    },
                    "verified_only": {
                        "type": "boolean",
                        "description": "Only return verified relationships",
                        "default": false
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default 100, max 500)",
                        "default": 100
                    }
                }
            }),
        },
        Tool {
            name: "find_path".to_string(),
            description: "Find the shortest connection path between two assets, ignoring edge direction".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "source_asset_id": {
                        "type": "string",
                        "description": "Starting asset"
                    },
                    "target_asset_id": {
                        "type": "string",
                        "description": "Ending asset"
                    }
                },
                "required": ["source_asset_id", "target_asset_id"]
            }),
        },
        Tool {
            name: "analyze_impact".to_string(),
            description: "Analyze the impact if an asset fails: directly affected assets, cascade effects, affected process areas, and safety implications. Example: \"If PLC-101 goes down, what's affected?\"".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "asset_id": {
                        "type": "string",
                        "description": "Asset to analyze"
                    },
                    "failure_type": {
                        "type": "string",
                        "description": "Type of failure scenario",
                        "enum": ["complete", "degraded", "intermittent"],
                        "default": "complete"
                    }
                },
                "required": ["asset_id"]
            }),
        },
        Tool {
            name: "find_single_points_of_failure".to_string(),
            description: "Identify assets that are single points of failure - assets with no redundancy where failure would cause significant impact".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "process_area": {
                        "type": "string",
                        "description": "Limit to specific process area"
                    },
                    "criticality_threshold": {
                        "type": "string",
                        "description": "Minimum criticality to consider",
                        "enum": ["critical", "high", "medium", "low"],
                        "default": "high"
                    }
                }
            }),
        },
        Tool {
            name: "find_gaps".to_string(),
            description: "Find assets with compliance or documentation gaps (missing owner, not in CMMS, undocumented, no security policy, unverified, stale verification)".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "gap_types": {
                        "type": "array",
                        "items": {
                            "type": "string",
                            "enum": ["no_owner", "not_in_cmms", "undocumented", "no_security_policy", "unverified", "stale_verification"]
                        },
                        "description": "Types of gaps to find (default: all except stale_verification)"
                    },
                    "process_area": {
                        "type": "string",
                        "description": "Filter to specific process area"
                    },
                    "criticality": {
                        "type": "string",
                        "description": "Filter by criticality",
                        "enum": ["critical", "high", "medium", "low"]
                    }
                }
            }),
        },
        Tool {
            name: "audit_summary".to_string(),
            description: "Generate audit readiness summary with compliance statistics, gap counts, weighted score, and recommendations".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "process_area": {
                        "type": "string",
                        "description": "Filter to specific process area"
                    },
                    "include_recommendations": {
                        "type": "boolean",
                        "description": "Include actionable recommendations",
                        "default": true
                    }
                }
            }),
        },
        Tool {
            name: "list_process_areas".to_string(),
            description: "List all process areas with asset counts and criticality breakdown".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "site_id": {
                        "type": "string",
                        "description": "Filter to specific site (name or ID)"
                    },
                    "include_asset_counts": {
                        "type": "boolean",
                        "description": "Include asset counts",
                        "default": true
                    }
                }
            }),
        },
        Tool {
            name: "get_process_area".to_string(),
            description: "Get detailed information about a specific process area including all its assets and compliance statistics".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "process_area_id": {
                        "type": "string",
                        "description": "Process area ID"
                    }
                },
                "required": ["process_area_id"]
            }),
        },
        Tool {
            name: "suggest_relationship".to_string(),
            description: "Suggest a new relationship between assets for human review. The edge is recorded as inferred and unverified, with a review flag attached".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "source_asset_id": {"type": "string"},
                    "target_asset_id": {"type": "string"},
                    "relationship_type": {
                        "type": "string",
                        "enum": ["feeds_data_to", "controls", "monitors", "safety_interlock_for", "depends_on", "redundant_with", "communicates_with", "powers", "backs_up"]
                    },
                    "reasoning": {
                        "type": "string",
                        "description": "Explanation for why this relationship is suggested"
                    }
                },
                "required": ["source_asset_id", "target_asset_id", "relationship_type", "reasoning"]
            }),
        },
        Tool {
            name: "flag_for_review".to_string(),
            description: "Flag an asset for human attention when a potential issue is identified".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "asset_id": {"type": "string"},
                    "flag_type": {
                        "type": "string",
                        "enum": ["missing_data", "needs_verification", "potential_issue", "compliance_gap", "ownership_unknown"]
                    },
                    "description": {"type": "string"},
                    "severity": {
                        "type": "string",
                        "enum": ["critical", "high", "medium", "low"],
                        "default": "medium"
                    }
                },
                "required": ["asset_id", "flag_type", "description"]
            }),
        },
        Tool {
            name: "list_review_flags".to_string(),
            description: "List review flags that need human attention, ordered by severity".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["open", "in_review", "resolved", "dismissed"],
                        "default": "open"
                    },
                    "flag_type": {
                        "type": "string",
                        "description": "Filter by flag type"
                    },
                    "asset_id": {
                        "type": "string",
                        "description": "Filter by asset"
                    },
                    "severity": {
                        "type": "string",
                        "enum": ["critical", "high", "medium", "low"]
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results (default 50, max 200)",
                        "default": 50
                    }
                }
            }),
        },
        Tool {
            name: "resolve_flag".to_string(),
            description: "Resolve or dismiss a review flag. Resolving a suggested-relationship flag marks the relationship as verified".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "flag_id": {"type": "string"},
                    "resolution": {
                        "type": "string",
                        "enum": ["resolved", "dismissed"]
                    },
                    "resolved_by": {
                        "type": "string",
                        "default": "user"
                    },
                    "notes": {
                        "type": "string",
                        "description": "Optional resolution notes"
                    }
                },
                "required": ["flag_id", "resolution"]
            }),
        },
    ]
}
