//! CorralServer - MCP server that exposes VPS lifecycle operations as tools.
//!
//! The server implements ServerHandler by hand: each tool parses its
//! arguments, calls the orchestrator, and returns JSON text content.

use crate::config::{ConfigError, CorralConfig};
use crate::types::*;

use corral_core::{
    FixedAddress, HostAddressDetector, LifecycleReport, LogNotifier, OwnerNotifier,
    ProvisionRequest, RouteDetector, VpsOrchestrator, VpsSnapshot, VpsState,
};
use corral_runtime::{build_runtime, CommandRunner, SystemRunner};
use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData,
};
use schemars::schema_for;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

type ToolOutcome<T> = Result<T, ToolError>;

/// MCP server for corral VPS operations.
#[derive(Clone)]
pub struct CorralServer {
    /// Orchestrator from corral-core
    orchestrator: Arc<VpsOrchestrator>,
}

impl CorralServer {
    /// Create a server around an existing orchestrator.
    pub fn new(orchestrator: Arc<VpsOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Wire runtime, detector, notifier and orchestrator from configuration.
    pub fn from_config(config: &CorralConfig) -> Result<Self, ConfigError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let runtime = build_runtime(config.runtime_config()?, Arc::clone(&runner));
        let core_config = config.core_config()?;

        let detector: Arc<dyn HostAddressDetector> = match config.host_ip {
            Some(ip) => Arc::new(FixedAddress(ip)),
            None => Arc::new(RouteDetector::new(runner, core_config.detect_timeout)),
        };

        let notifier: Arc<dyn OwnerNotifier> = match &config.webhook_url {
            Some(url) => Arc::new(corral_core::WebhookNotifier::new(
                url.clone(),
                Duration::from_secs(10),
            )?),
            None => Arc::new(LogNotifier),
        };

        let orchestrator = VpsOrchestrator::new(core_config, runtime, detector, notifier);
        Ok(Self::new(Arc::new(orchestrator)))
    }

    /// Get a reference to the orchestrator.
    pub fn orchestrator(&self) -> &VpsOrchestrator {
        &self.orchestrator
    }

    /// Parse tool arguments into `T`.
    fn parse_args<T: DeserializeOwned>(
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> ToolOutcome<T> {
        let value = serde_json::Value::Object(args.unwrap_or_default());
        serde_json::from_value(value).map_err(|e| ToolError::invalid_arguments(e.to_string()))
    }

    /// Helper to create success result with JSON content
    fn json_result<T: serde::Serialize>(data: &T) -> CallToolResult {
        match serde_json::to_string_pretty(data) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!(
                "JSON serialization error: {e}"
            ))]),
        }
    }

    /// Helper to create error result
    fn error_result(error: &ToolError) -> CallToolResult {
        let text = serde_json::to_string(error).unwrap_or_else(|_| error.message.clone());
        CallToolResult::error(vec![Content::text(text)])
    }

    fn respond<T: serde::Serialize>(outcome: ToolOutcome<T>) -> CallToolResult {
        match outcome {
            Ok(data) => Self::json_result(&data),
            Err(e) => Self::error_result(&e),
        }
    }

    /// Convert schemars RootSchema to rmcp JsonObject
    fn schema_to_json_object<T: schemars::JsonSchema>(
    ) -> Arc<serde_json::Map<String, serde_json::Value>> {
        let schema = schema_for!(T);
        let json = serde_json::to_value(&schema.schema).unwrap_or_else(|_| serde_json::json!({}));
        match json {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        }
    }

    fn lifecycle_result(report: LifecycleReport) -> LifecycleResult {
        LifecycleResult {
            vps: VpsInfo::from(VpsSnapshot {
                record: report.record,
                status: report.status,
                state: VpsState::Active,
            }),
            warnings: report.warnings,
        }
    }

    // ========================================================================
    // Tool Implementations
    // ========================================================================

    async fn provision_vps(&self, params: ProvisionVpsParams) -> ToolOutcome<LifecycleResult> {
        tracing::info!(
            caller_id = params.caller_id,
            vps_id = %params.vps_id,
            owner_id = params.owner_id,
            "Tool: provision_vps"
        );
        let mut request = ProvisionRequest::new(params.vps_id, params.owner_id, params.password);
        request.os_type = params.os_type;
        if let Some(gb) = params.ram_gb {
            request = request.ram_gb(gb);
        }
        if let Some(cores) = params.cpu_cores {
            request = request.cpu_cores(cores);
        }
        if let Some(gb) = params.disk_gb {
            request = request.disk_gb(gb);
        }

        let report = self.orchestrator.provision(params.caller_id, request).await?;
        Ok(Self::lifecycle_result(report))
    }

    async fn describe_vps(&self, params: VpsTargetParams) -> ToolOutcome<VpsInfo> {
        let snapshot = self
            .orchestrator
            .describe(params.caller_id, &params.vps_id)
            .await?;
        Ok(VpsInfo::from(snapshot))
    }

    async fn start_vps(&self, params: VpsTargetParams) -> ToolOutcome<PowerResult> {
        tracing::info!(caller_id = params.caller_id, vps_id = %params.vps_id, "Tool: start_vps");
        let status = self
            .orchestrator
            .start(params.caller_id, &params.vps_id)
            .await?;
        Ok(PowerResult {
            vps_id: params.vps_id,
            status: status.to_string(),
        })
    }

    async fn stop_vps(&self, params: VpsTargetParams) -> ToolOutcome<PowerResult> {
        tracing::info!(caller_id = params.caller_id, vps_id = %params.vps_id, "Tool: stop_vps");
        let status = self
            .orchestrator
            .stop(params.caller_id, &params.vps_id)
            .await?;
        Ok(PowerResult {
            vps_id: params.vps_id,
            status: status.to_string(),
        })
    }

    async fn restart_vps(&self, params: VpsTargetParams) -> ToolOutcome<PowerResult> {
        tracing::info!(caller_id = params.caller_id, vps_id = %params.vps_id, "Tool: restart_vps");
        let status = self
            .orchestrator
            .restart(params.caller_id, &params.vps_id)
            .await?;
        Ok(PowerResult {
            vps_id: params.vps_id,
            status: status.to_string(),
        })
    }

    async fn reinstall_vps(&self, params: VpsTargetParams) -> ToolOutcome<LifecycleResult> {
        tracing::info!(caller_id = params.caller_id, vps_id = %params.vps_id, "Tool: reinstall_vps");
        let report = self
            .orchestrator
            .reinstall(params.caller_id, &params.vps_id)
            .await?;
        Ok(Self::lifecycle_result(report))
    }

    async fn change_password(&self, params: ChangePasswordParams) -> ToolOutcome<SuccessResult> {
        tracing::info!(caller_id = params.caller_id, vps_id = %params.vps_id, "Tool: change_password");
        self.orchestrator
            .change_password(params.caller_id, &params.vps_id, &params.new_password)
            .await?;
        Ok(SuccessResult { success: true })
    }

    async fn delete_vps(&self, params: VpsTargetParams) -> ToolOutcome<SuccessResult> {
        tracing::info!(caller_id = params.caller_id, vps_id = %params.vps_id, "Tool: delete_vps");
        self.orchestrator
            .delete(params.caller_id, &params.vps_id)
            .await?;
        Ok(SuccessResult { success: true })
    }

    async fn list_vps(&self, params: ListVpsParams) -> ToolOutcome<ListVpsResult> {
        tracing::debug!(caller_id = params.caller_id, "Tool: list_vps");
        let vps_ids = self.orchestrator.list(params.caller_id).await?;
        Ok(ListVpsResult { vps_ids })
    }

    /// Parse, run and wrap one tool call.
    async fn dispatch(
        &self,
        name: &str,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> CallToolResult {
        macro_rules! run {
            ($method:ident) => {
                match Self::parse_args(args) {
                    Ok(params) => Self::respond(self.$method(params).await),
                    Err(e) => Self::error_result(&e),
                }
            };
        }

        let result = match name {
            "provision_vps" => run!(provision_vps),
            "describe_vps" => run!(describe_vps),
            "start_vps" => run!(start_vps),
            "stop_vps" => run!(stop_vps),
            "restart_vps" => run!(restart_vps),
            "reinstall_vps" => run!(reinstall_vps),
            "change_password" => run!(change_password),
            "delete_vps" => run!(delete_vps),
            "list_vps" => run!(list_vps),
            _ => Self::error_result(&ToolError {
                error: "unknown_tool".into(),
                message: format!("Unknown tool: {name}"),
            }),
        };
        if result.is_error == Some(true) {
            tracing::warn!(tool = name, "Tool call failed");
        }
        result
    }

    /// Build the list of available tools
    fn build_tools_list() -> Vec<Tool> {
        vec![
            Tool::new(
                "provision_vps",
                "Create, configure and start a new VPS with a static IP. Privileged operators only.",
                Self::schema_to_json_object::<ProvisionVpsParams>(),
            ),
            Tool::new(
                "describe_vps",
                "Show a VPS's address, credentials, resources and live status. Owner only.",
                Self::schema_to_json_object::<VpsTargetParams>(),
            ),
            Tool::new(
                "start_vps",
                "Start a stopped VPS. Owner only.",
                Self::schema_to_json_object::<VpsTargetParams>(),
            ),
            Tool::new(
                "stop_vps",
                "Stop a running VPS. Owner only.",
                Self::schema_to_json_object::<VpsTargetParams>(),
            ),
            Tool::new(
                "restart_vps",
                "Stop then start a VPS. Owner only.",
                Self::schema_to_json_object::<VpsTargetParams>(),
            ),
            Tool::new(
                "reinstall_vps",
                "Wipe a VPS and recreate it with the same id, IP and resources. Owner only.",
                Self::schema_to_json_object::<VpsTargetParams>(),
            ),
            Tool::new(
                "change_password",
                "Set a new root password on a running VPS. Owner only.",
                Self::schema_to_json_object::<ChangePasswordParams>(),
            ),
            Tool::new(
                "delete_vps",
                "Destroy a VPS and remove its record. Owner or privileged operator.",
                Self::schema_to_json_object::<VpsTargetParams>(),
            ),
            Tool::new(
                "list_vps",
                "List the ids of the caller's VPSes.",
                Self::schema_to_json_object::<ListVpsParams>(),
            ),
        ]
    }
}

// ============================================================================
// ServerHandler Implementation
// ============================================================================

impl ServerHandler for CorralServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Corral MCP Server - Provision and manage container VPSes on this host. \
                 Every tool takes caller_id, the operator on whose behalf the call is made. \
                 Use provision_vps to create a VPS, describe_vps for its access details, \
                 start_vps/stop_vps/restart_vps for power control, reinstall_vps to wipe it, \
                 change_password to rotate the root password and delete_vps to remove it."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: Self::build_tools_list(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.dispatch(request.name.as_ref(), request.arguments).await)
    }
}
