//! Domain types exchanged with the agent server.
//!
//! Everything here serializes with camelCase field names, matching the
//! server's wire format. Types that appear inside `session.create` /
//! `session.resume` params carry their validation next to them so
//! configuration faults surface before any I/O.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Observable state of the connection to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport established.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport is up and healthy.
    Connected,
    /// The connection failed and has not (yet) been restored.
    Error,
}

/// Observable state of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// The session accepts messages.
    Active,
    /// The session is being re-established after a connection loss.
    Resuming,
    /// The session could not be restored; it accepts nothing further.
    Failed,
    /// The session was closed deliberately.
    Closed,
}

/// Verbosity the spawned server logs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Suppress all server logging.
    None,
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warning,
    /// Informational logging.
    #[default]
    Info,
    /// Verbose debugging output.
    Debug,
    /// Everything the server can emit.
    All,
}

/// Definition of a client-registered tool, as sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Tool name the model invokes it by.
    pub name: String,
    /// What the tool does, shown to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the tool's arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl Tool {
    /// Creates a tool definition with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
        }
    }

    /// Rejects empty or whitespace-containing tool names.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::configuration("tool name must not be empty"));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(Error::configuration(format!(
                "tool name {:?} must not contain whitespace",
                self.name
            )));
        }
        Ok(())
    }
}

/// A server-initiated tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Session the invocation belongs to.
    pub session_id: String,
    /// Unique id of this invocation; the result echoes it.
    pub tool_call_id: String,
    /// Which tool to run.
    pub tool_name: String,
    /// Arguments, matching the tool's parameter schema.
    #[serde(default)]
    pub arguments: Value,
}

/// Outcome classification of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultType {
    /// The tool ran and produced content.
    Success,
    /// The tool ran but failed.
    Failure,
    /// The client declined to run the tool.
    Rejected,
    /// Permission to run the tool was denied.
    Denied,
}

/// Reply to a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Outcome classification.
    pub result_type: ToolResultType,
    /// Content produced by the tool, for `Success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Error text, for `Failure`/`Rejected`/`Denied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result carrying `content`.
    pub fn success(content: Value) -> Self {
        Self {
            result_type: ToolResultType::Success,
            content: Some(content),
            error: None,
        }
    }

    /// A failed result carrying an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result_type: ToolResultType::Failure,
            content: None,
            error: Some(error.into()),
        }
    }

    /// A rejected result carrying an explanation.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            result_type: ToolResultType::Rejected,
            content: None,
            error: Some(error.into()),
        }
    }

    /// A denied result carrying an explanation.
    pub fn denied(error: impl Into<String>) -> Self {
        Self {
            result_type: ToolResultType::Denied,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// What kind of action a permission request is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    /// Running a shell command.
    Shell,
    /// Writing to the filesystem.
    Write,
    /// Invoking an MCP server tool.
    Mcp,
    /// Reading from the filesystem.
    Read,
    /// Fetching a URL.
    Url,
}

/// A server-initiated permission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Session the request belongs to.
    pub session_id: String,
    /// What kind of action needs approval.
    pub kind: PermissionKind,
    /// Tool call this request gates, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Kind-specific detail (command text, path, url, server name).
    #[serde(flatten)]
    pub detail: HashMap<String, Value>,
}

/// Decision kinds a permission request resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionDecision {
    /// The action may proceed.
    #[serde(rename = "approved")]
    Approved,
    /// A configured rule denied the action.
    #[serde(rename = "denied-by-rules")]
    DeniedByRules,
    /// No rule approved it and nobody could be asked.
    #[serde(rename = "denied-no-approval-rule-and-could-not-request-from-user")]
    DeniedNoApprovalRule,
    /// A user was asked and said no.
    #[serde(rename = "denied-interactively-by-user")]
    DeniedInteractively,
}

/// Reply to a permission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestResult {
    /// The decision.
    pub kind: PermissionDecision,
    /// Rules the decision should persist for future requests, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<String>>,
}

impl PermissionRequestResult {
    /// Approves the request.
    pub fn approved() -> Self {
        Self {
            kind: PermissionDecision::Approved,
            rules: None,
        }
    }

    /// The default-deny outcome used when no handler can decide.
    pub fn denied_no_approval_rule() -> Self {
        Self {
            kind: PermissionDecision::DeniedNoApprovalRule,
            rules: None,
        }
    }

    /// An interactive denial.
    pub fn denied_interactively() -> Self {
        Self {
            kind: PermissionDecision::DeniedInteractively,
            rules: None,
        }
    }
}

/// How a custom system message combines with the server's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMessageMode {
    /// Append to the default system message.
    Append,
    /// Replace the default system message entirely.
    Replace,
}

/// Custom system message configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessageConfig {
    /// Append or replace.
    pub mode: SystemMessageMode,
    /// The message text.
    pub content: String,
}

/// Which chat wire API a custom provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireApi {
    /// Chat-completions style endpoint.
    Completions,
    /// Responses-style endpoint.
    Responses,
}

/// Vendor family of a custom provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI-compatible endpoint.
    OpenAi,
    /// Azure OpenAI endpoint.
    Azure,
    /// Anthropic-compatible endpoint.
    Anthropic,
}

/// Azure-specific provider options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureProviderOptions {
    /// API version query parameter.
    #[serde(default = "AzureProviderOptions::default_api_version")]
    pub api_version: String,
}

impl AzureProviderOptions {
    fn default_api_version() -> String {
        "2024-10-21".to_string()
    }
}

impl Default for AzureProviderOptions {
    fn default() -> Self {
        Self {
            api_version: Self::default_api_version(),
        }
    }
}

/// Bring-your-own-key model provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Vendor family of the endpoint.
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Base URL of the endpoint.
    pub base_url: String,
    /// API key, when the endpoint needs one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Which wire API the endpoint speaks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wire_api: Option<WireApi>,
    /// Azure-only options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureProviderOptions>,
}

impl ProviderConfig {
    /// Rejects providers without a usable base URL.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::configuration("provider base_url must not be empty"));
        }
        Ok(())
    }
}

/// One MCP server entry in the session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    /// Server spawned locally as a child process.
    Local {
        /// Executable to run.
        command: String,
        /// Arguments passed to it.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Environment for the spawned server.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
        /// Restrict to these tools, when present.
        #[serde(skip_serializing_if = "Option::is_none")]
        tools: Option<Vec<String>>,
    },
    /// Server reached over HTTP or SSE.
    Remote {
        /// Server URL.
        url: String,
        /// `"http"` or `"sse"`.
        #[serde(rename = "type")]
        transport: String,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

/// A custom agent definition forwarded to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAgentConfig {
    /// Agent name.
    pub name: String,
    /// Short description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The agent's prompt.
    pub prompt: String,
    /// Tools the agent may use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

/// Context-compaction tuning for sessions that never run out of buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniteSessionConfig {
    /// Whether compaction runs at all.
    #[serde(default = "InfiniteSessionConfig::default_enabled")]
    pub enabled: bool,
    /// Utilization at which background compaction starts.
    #[serde(default = "InfiniteSessionConfig::default_background_threshold")]
    pub background_compaction_threshold: f64,
    /// Utilization at which sends block until compaction finishes.
    #[serde(default = "InfiniteSessionConfig::default_buffer_threshold")]
    pub buffer_exhaustion_threshold: f64,
}

impl InfiniteSessionConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_background_threshold() -> f64 {
        0.80
    }

    fn default_buffer_threshold() -> f64 {
        0.95
    }

    /// Rejects threshold values outside `0 < background < buffer <= 1`.
    pub fn validate(&self) -> Result<()> {
        let bg = self.background_compaction_threshold;
        let buf = self.buffer_exhaustion_threshold;
        if !(bg > 0.0 && bg < 1.0) {
            return Err(Error::configuration(format!(
                "background_compaction_threshold must be in (0, 1), got {bg}"
            )));
        }
        if !(buf > 0.0 && buf <= 1.0) {
            return Err(Error::configuration(format!(
                "buffer_exhaustion_threshold must be in (0, 1], got {buf}"
            )));
        }
        if bg >= buf {
            return Err(Error::configuration(format!(
                "background_compaction_threshold ({bg}) must be below buffer_exhaustion_threshold ({buf})"
            )));
        }
        Ok(())
    }
}

impl Default for InfiniteSessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            background_compaction_threshold: 0.80,
            buffer_exhaustion_threshold: 0.95,
        }
    }
}

/// Serializable configuration for `session.create`.
///
/// Tool and permission *handlers* are not part of this type; they stay
/// client-side and only the tool definitions travel to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Requested session id; the server mints one when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Model to run the session with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Custom system message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<SystemMessageConfig>,
    /// Client-registered tool definitions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    /// Restrict the server's built-in tools to these. Takes precedence
    /// over `excluded_tools` when both are set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_tools: Option<Vec<String>>,
    /// Remove these from the server's built-in tools. Ignored when
    /// `available_tools` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_tools: Option<Vec<String>>,
    /// Stream assistant output as delta events.
    #[serde(default = "SessionConfig::default_streaming")]
    pub streaming: bool,
    /// Custom model provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,
    /// MCP servers available to the session.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Custom agents available to the session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_agents: Vec<CustomAgentConfig>,
    /// Override the server's configuration directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<String>,
    /// Extra directories to load skills from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_directories: Vec<String>,
    /// Skills to disable by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_skills: Vec<String>,
    /// Context-compaction tuning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infinite_sessions: Option<InfiniteSessionConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            model: None,
            system_message: None,
            tools: Vec::new(),
            available_tools: None,
            excluded_tools: None,
            streaming: true,
            provider: None,
            mcp_servers: HashMap::new(),
            custom_agents: Vec::new(),
            config_dir: None,
            skill_directories: Vec::new(),
            disabled_skills: Vec::new(),
            infinite_sessions: None,
        }
    }
}

impl SessionConfig {
    fn default_streaming() -> bool {
        true
    }

    /// Validates everything that can be checked without I/O.
    pub fn validate(&self) -> Result<()> {
        for tool in &self.tools {
            tool.validate()?;
        }
        if let Some(provider) = &self.provider {
            provider.validate()?;
        }
        if let Some(infinite) = &self.infinite_sessions {
            infinite.validate()?;
        }
        Ok(())
    }
}

/// Serializable configuration for `session.resume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSessionConfig {
    /// Tool definitions to re-register.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    /// Stream assistant output as delta events.
    #[serde(default = "SessionConfig::default_streaming")]
    pub streaming: bool,
    /// Custom model provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,
    /// Context-compaction tuning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infinite_sessions: Option<InfiniteSessionConfig>,
}

impl Default for ResumeSessionConfig {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            streaming: true,
            provider: None,
            infinite_sessions: None,
        }
    }
}

impl ResumeSessionConfig {
    /// Validates everything that can be checked without I/O.
    pub fn validate(&self) -> Result<()> {
        for tool in &self.tools {
            tool.validate()?;
        }
        if let Some(provider) = &self.provider {
            provider.validate()?;
        }
        if let Some(infinite) = &self.infinite_sessions {
            infinite.validate()?;
        }
        Ok(())
    }
}

/// What kind of filesystem object an attachment points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// A single file.
    File,
    /// A directory tree.
    Directory,
}

/// A file or directory attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// File or directory.
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// Path on the client machine.
    pub path: String,
    /// Name shown in place of the raw path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Delivery mode for `session.send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageMode {
    /// Queue behind earlier sends; order of acceptance equals call order.
    #[default]
    Enqueue,
    /// Deliver immediately, ahead of the queue.
    Immediate,
}

/// Payload of `session.send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOptions {
    /// The user's prompt.
    pub prompt: String,
    /// Files and directories attached to the prompt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Queueing behavior.
    #[serde(default)]
    pub mode: MessageMode,
}

impl MessageOptions {
    /// A plain prompt with no attachments, enqueued.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            attachments: Vec::new(),
            mode: MessageMode::Enqueue,
        }
    }

    /// Rejects empty prompts and attachments without a path.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.is_empty() {
            return Err(Error::configuration("prompt must not be empty"));
        }
        for attachment in &self.attachments {
            if attachment.path.is_empty() {
                return Err(Error::configuration("attachment path must not be empty"));
            }
        }
        Ok(())
    }
}

/// Reply to `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    /// Echo of the ping message, when one was sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Server timestamp, milliseconds since the epoch.
    pub timestamp: i64,
    /// Protocol version the server speaks.
    pub protocol_version: u32,
}

/// Reply to `status.get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStatusResponse {
    /// Server build version.
    pub version: String,
    /// Protocol version the server speaks.
    pub protocol_version: u32,
}

/// Reply to `auth.getStatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAuthStatusResponse {
    /// Whether the server holds working credentials.
    pub is_authenticated: bool,
    /// How the server authenticated ("token", "user"), when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    /// Host the credentials are for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Login name of the authenticated user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// Human-readable status detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Reply to `session.create` / `session.resume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreateResponse {
    /// Id of the created or resumed session.
    pub session_id: String,
}

/// Reply to `session.send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSendResponse {
    /// Id of the accepted message.
    pub message_id: String,
}

/// One entry in the reply to `models.list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model id usable in [`SessionConfig::model`].
    pub id: String,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fields this client does not interpret.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// One entry in the reply to `session.list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Session id.
    pub session_id: String,
    /// One-line summary, when the server has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Fields this client does not interpret.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}
