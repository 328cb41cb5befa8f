use crate::config::Config;
use crate::db::Db;
use crate::error::{OtInvError, Result};
use crate::mcp::types::*;
use crate::mcp::{tools, tools_analysis, tools_assets, tools_compliance, tools_graph, tools_review};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as AsyncBufReader};

/// MCP server over the inventory database. Transport-agnostic core with a
/// newline-delimited stdio loop in `run`.
pub struct McpServer {
    db: Db,
    config: Config,
}

impl McpServer {
    pub fn new(db: Db, config: Config) -> Self {
        Self { db, config }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process an MCP JSON-RPC request (transport-agnostic).
    ///
    /// Returns `Ok(None)` for notifications, which get no response. Handler
    /// errors become INTERNAL_ERROR responses rather than failing the loop.
    pub async fn process_mcp_request(
        &self,
        request: JsonRpcRequest,
        initialized: &mut bool,
    ) -> Result<Option<JsonRpcResponse>> {
        let id = match &request.id {
            Some(id) => id.clone(),
            None => {
                if request.method == "notifications/initialized" {
                    *initialized = true;
                }
                return Ok(None);
            }
        };

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(&id, &request.params).await,
            "tools/list" => self.handle_tools_list(&id).await,
            "tools/call" => self.handle_tools_call(&id, &request.params).await,
            "shutdown" => self.handle_shutdown(&id).await,
            _ => self.handle_error(
                &id,
                error_codes::METHOD_NOT_FOUND,
                &format!("Unknown method: {}", request.method),
            ),
        };

        match response {
            Ok(resp) => Ok(Some(resp)),
            Err(e) => Ok(Some(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: id.into(),
                payload: JsonRpcResponsePayload::Error {
                    error: JsonRpcError {
                        code: error_codes::INTERNAL_ERROR,
                        message: format!("Internal error: {}", e),
                        data: Some(serde_json::json!({ "details": e.to_string() })),
                    },
                },
            })),
        }
    }

    /// Run the MCP server (reads from stdin, writes to stdout).
    pub async fn run(&mut self) -> Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdin_reader = AsyncBufReader::new(stdin);
        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();

        let mut line = String::new();
        let mut initialized = false;

        // Log to stderr; stdout carries only protocol frames.
        let _ = stderr
            .write_all(
                format!(
                    "otinv MCP server v{} starting...\n",
                    env!("CARGO_PKG_VERSION")
                )
                .as_bytes(),
            )
            .await;

        loop {
            line.clear();
            let bytes_read = stdin_reader.read_line(&mut line).await.map_err(|e| {
                OtInvError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to read from stdin: {}", e),
                ))
            })?;

            // EOF - client disconnected
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(req) => req,
                Err(e) => {
                    if let Some(id) = extract_id_from_line(trimmed) {
                        let error_response = JsonRpcResponse {
                            jsonrpc: "2.0".to_string(),
                            id,
                            payload: JsonRpcResponsePayload::Error {
                                error: JsonRpcError {
                                    code: error_codes::PARSE_ERROR,
                                    message: format!("Parse error: {}", e),
                                    data: None,
                                },
                            },
                        };
                        send_response(&mut stdout, &error_response).await?;
                    }
                    continue;
                }
            };

            match self.process_mcp_request(request, &mut initialized).await {
                Ok(Some(response)) => {
                    send_response(&mut stdout, &response).await?;
                }
                Ok(None) => {
                    if initialized {
                        let _ = stderr.write_all(b"Client initialized\n").await;
                    }
                }
                Err(e) => {
                    log::error!("Unexpected error in process_mcp_request: {}", e);
                }
            }
        }

        let _ = stderr.write_all(b"MCP server shutting down\n").await;
        Ok(())
    }

    async fn handle_initialize(
        &self,
        id: &JsonRpcId,
        params: &Option<Value>,
    ) -> Result<JsonRpcResponse> {
        let params: InitializeParams =
            serde_json::from_value(params.clone().unwrap_or(serde_json::json!({})))
                .map_err(|e| OtInvError::McpProtocol(format!("Invalid initialize params: {}", e)))?;

        // Clients speaking any 2024/2025 revision get the stable version back.
        let protocol_version = if params.protocol_version.starts_with("2024")
            || params.protocol_version.starts_with("2025")
        {
            "2024-11-05".to_string()
        } else {
            params.protocol_version.clone()
        };

        let result = InitializeResult {
            protocol_version,
            capabilities: serde_json::json!({
                "tools": {}
            }),
            server_info: ServerInfo {
                name: "otinv".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        self.result_response(id, &result)
    }

    async fn handle_tools_list(&self, id: &JsonRpcId) -> Result<JsonRpcResponse> {
        let result = ToolsListResult {
            tools: tools::get_tool_definitions(),
        };
        self.result_response(id, &result)
    }

    async fn handle_tools_call(
        &self,
        id: &JsonRpcId,
        params: &Option<Value>,
    ) -> Result<JsonRpcResponse> {
        let params: ToolsCallParams = serde_json::from_value(
            params
                .clone()
                .ok_or_else(|| OtInvError::McpProtocol("Missing params for tools/call".to_string()))?,
        )
        .map_err(|e| OtInvError::McpProtocol(format!("Invalid tools/call params: {}", e)))?;

        let db = &self.db;
        // Absent arguments deserialize as null; handlers expect an object.
        let args = if params.arguments.is_null() {
            Value::Object(Default::default())
        } else {
            params.arguments
        };
        let args = &args;
        let result = match params.name.as_str() {
            "list_assets" => tools_assets::handle_list_assets(db, args).await?,
            "get_asset" => tools_assets::handle_get_asset(db, args).await?,
            "search_assets" => tools_assets::handle_search_assets(db, args).await?,
            "get_upstream" => tools_graph::handle_get_upstream(db, args).await?,
            "get_downstream" => tools_graph::handle_get_downstream(db, args).await?,
            "get_dependencies" => tools_graph::handle_get_dependencies(db, args).await?,
            "list_relationships" => tools_graph::handle_list_relationships(db, args).await?,
            "find_path" => tools_graph::handle_find_path(db, args).await?,
            "analyze_impact" => tools_analysis::handle_analyze_impact(db, args).await?,
            "find_single_points_of_failure" => {
                tools_analysis::handle_find_spofs(db, args).await?
            }
            "find_gaps" => tools_compliance::handle_find_gaps(db, args).await?,
            "audit_summary" => tools_compliance::handle_audit_summary(db, args).await?,
            "list_process_areas" => {
                tools_compliance::handle_list_process_areas(db, args).await?
            }
            "get_process_area" => tools_compliance::handle_get_process_area(db, args).await?,
            "suggest_relationship" => {
                tools_review::handle_suggest_relationship(db, args).await?
            }
            "flag_for_review" => tools_review::handle_flag_for_review(db, args).await?,
            "list_review_flags" => tools_review::handle_list_review_flags(db, args).await?,
            "resolve_flag" => tools_review::handle_resolve_flag(db, args).await?,
            _ => {
                return Ok(JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    id: id.clone().into(),
                    payload: JsonRpcResponsePayload::Error {
                        error: JsonRpcError {
                            code: error_codes::INVALID_PARAMS,
                            message: format!("Unknown tool: {}", params.name),
                            data: None,
                        },
                    },
                });
            }
        };
        self.result_response(id, &result)
    }

    async fn handle_shutdown(&self, id: &JsonRpcId) -> Result<JsonRpcResponse> {
        Ok(JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: id.clone().into(),
            payload: JsonRpcResponsePayload::Result {
                result: serde_json::json!(null),
            },
        })
    }

    fn result_response<T: serde::Serialize>(
        &self,
        id: &JsonRpcId,
        result: &T,
    ) -> Result<JsonRpcResponse> {
        Ok(JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: id.clone().into(),
            payload: JsonRpcResponsePayload::Result {
                result: serde_json::to_value(result)
                    .map_err(|e| OtInvError::Parse(format!("JSON serialization error: {}", e)))?,
            },
        })
    }

    fn handle_error(&self, id: &JsonRpcId, code: i32, message: &str) -> Result<JsonRpcResponse> {
        Ok(JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: id.clone().into(),
            payload: JsonRpcResponsePayload::Error {
                error: JsonRpcError {
                    code,
                    message: message.to_string(),
                    data: None,
                },
            },
        })
    }
}

/// Send JSON-RPC response to stdout (newline-delimited)
async fn send_response(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| OtInvError::Parse(format!("JSON serialization error: {}", e)))?;
    stdout.write_all(json.as_bytes()).await.map_err(OtInvError::Io)?;
    stdout.write_all(b"\n").await.map_err(OtInvError::Io)?;
    stdout.flush().await.map_err(OtInvError::Io)?;
    Ok(())
}

/// Extract ID from JSON line (for error handling)
fn extract_id_from_line(line: &str) -> Option<Value> {
    if let Some(id_start) = line.find(r#""id":"#) {
        let id_str = &line[id_start + 5..];
        if let Some(id_end) = id_str.find(',') {
            let id_val = id_str[..id_end].trim();
            if id_val.starts_with('"') && id_val.ends_with('"') {
                return Some(Value::String(id_val[1..id_val.len() - 1].to_string()));
            } else if let Ok(num) = id_val.parse::<i64>() {
                return Some(Value::Number(num.into()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_support::{insert_asset, test_db};
    use crate::model::AssetType;
    use serde_json::json;

    fn test_config(db_path: std::path::PathBuf) -> Config {
        Config {
            inventory: crate::config::InventoryConfig {
                db_path,
                log_level: "info".to_string(),
                seed_data: false,
                seed_data_path: std::path::PathBuf::from("data/sample_data.json"),
            },
            http_server: Default::default(),
        }
    }

    async fn test_server() -> (McpServer, tempfile::TempDir) {
        let (db, temp) = test_db().await;
        let config = test_config(temp.path().join("inventory.db"));
        (McpServer::new(db, config), temp)
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(JsonRpcId::Number(1)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[test]
    fn test_extract_id_from_line() {
        let line = r#"{"jsonrpc":"2.0","id":"test-123","method":"test"}"#;
        let id = extract_id_from_line(line);
        assert_eq!(id, Some(Value::String("test-123".to_string())));

        let line = r#"{"jsonrpc":"2.0","id":42,"method":"test"}"#;
        let id = extract_id_from_line(line);
        assert_eq!(id, Some(Value::Number(42.into())));
    }

    #[tokio::test]
    async fn test_initialize_pins_stable_protocol() {
        let (server, _temp) = test_server().await;
        let mut initialized = false;
        let response = server
            .process_mcp_request(
                request(
                    "initialize",
                    json!({"protocolVersion": "2025-06-18", "capabilities": {}}),
                ),
                &mut initialized,
            )
            .await
            .unwrap()
            .unwrap();
        match response.payload {
            JsonRpcResponsePayload::Result { result } => {
                assert_eq!(result["protocolVersion"], "2024-11-05");
                assert_eq!(result["serverInfo"]["name"], "otinv");
            }
            JsonRpcResponsePayload::Error { error } => panic!("unexpected error: {:?}", error),
        }
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let (server, _temp) = test_server().await;
        let mut initialized = false;
        let response = server
            .process_mcp_request(
                JsonRpcRequest {
                    jsonrpc: "2.0".to_string(),
                    id: None,
                    method: "notifications/initialized".to_string(),
                    params: None,
                },
                &mut initialized,
            )
            .await
            .unwrap();
        assert!(response.is_none());
        assert!(initialized);
    }

    #[tokio::test]
    async fn test_tools_list_catalog() {
        let (server, _temp) = test_server().await;
        let mut initialized = true;
        let response = server
            .process_mcp_request(request("tools/list", json!({})), &mut initialized)
            .await
            .unwrap()
            .unwrap();
        match response.payload {
            JsonRpcResponsePayload::Result { result } => {
                assert_eq!(result["tools"].as_array().unwrap().len(), 18);
            }
            JsonRpcResponsePayload::Error { error } => panic!("unexpected error: {:?}", error),
        }
    }

    #[tokio::test]
    async fn test_tools_call_dispatch() {
        let (server, _temp) = test_server().await;
        insert_asset(server.db(), "PLC-1", AssetType::Controller, None).await;
        let mut initialized = true;
        let response = server
            .process_mcp_request(
                request(
                    "tools/call",
                    json!({"name": "get_asset", "arguments": {"asset_id": "PLC-1"}}),
                ),
                &mut initialized,
            )
            .await
            .unwrap()
            .unwrap();
        match response.payload {
            JsonRpcResponsePayload::Result { result } => {
                let text = result["content"][0]["text"].as_str().unwrap();
                assert!(text.contains("PLC-1"));
            }
            JsonRpcResponsePayload::Error { error } => panic!("unexpected error: {:?}", error),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let (server, _temp) = test_server().await;
        let mut initialized = true;
        let response = server
            .process_mcp_request(
                request("tools/call", json!({"name": "launch_rocket", "arguments": {}})),
                &mut initialized,
            )
            .await
            .unwrap()
            .unwrap();
        match response.payload {
            JsonRpcResponsePayload::Result { .. } => panic!("expected error"),
            JsonRpcResponsePayload::Error { error } => {
                assert_eq!(error.code, error_codes::INVALID_PARAMS);
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (server, _temp) = test_server().await;
        let mut initialized = true;
        let response = server
            .process_mcp_request(request("resources/list", json!({})), &mut initialized)
            .await
            .unwrap()
            .unwrap();
        match response.payload {
            JsonRpcResponsePayload::Result { .. } => panic!("expected error"),
            JsonRpcResponsePayload::Error { error } => {
                assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
            }
        }
    }
}
