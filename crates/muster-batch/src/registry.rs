use std::collections::HashMap;
use std::sync::Arc;

use muster_core::error::{MusterError, Result};
use muster_core::types::CommandSpec;

/// Builds a [`CommandSpec`] for one named batch command, validating its
/// parameters before anything is dispatched.
pub trait CommandHandler: Send + Sync + 'static {
    /// Command name (used for registry lookup).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Validate parameters and produce the command descriptor.
    fn build(&self, params: serde_json::Value) -> Result<CommandSpec>;
}

/// Closed registry of batch-capable commands, built at startup.
///
/// An unknown command name is a configuration error surfaced to the
/// caller, never a missing-method fault.
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a command handler.
    pub fn register(&mut self, handler: impl CommandHandler) {
        let name = handler.name().to_string();
        self.handlers.insert(name, Arc::new(handler));
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn CommandHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| MusterError::UnknownCommand(name.to_string()))
    }

    /// List registered command names.
    pub fn list(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    /// Validate parameters and build the descriptor in one step.
    pub fn build(&self, name: &str, params: serde_json::Value) -> Result<CommandSpec> {
        self.get(name)?.build(params)
    }

    /// Registry with all built-in batch commands registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(RpcCommand);
        registry.register(ServiceCommand);
        registry.register(PackageCommand);
        registry
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn require_str(params: &serde_json::Value, key: &str, command: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| MusterError::CommandParams {
            command: command.to_string(),
            message: format!("missing required string parameter '{key}'"),
        })
}

/// Generic RPC: address any agent plugin/action pair directly.
struct RpcCommand;

impl CommandHandler for RpcCommand {
    fn name(&self) -> &str {
        "rpc"
    }

    fn description(&self) -> &str {
        "Invoke an arbitrary agent action"
    }

    fn build(&self, params: serde_json::Value) -> Result<CommandSpec> {
        let agent = require_str(&params, "agent", self.name())?;
        let action = require_str(&params, "action", self.name())?;
        let args = params
            .get("args")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(CommandSpec::new(agent, action).with_params(args))
    }
}

/// Manage a system service on each node.
struct ServiceCommand;

impl CommandHandler for ServiceCommand {
    fn name(&self) -> &str {
        "service"
    }

    fn description(&self) -> &str {
        "Start, stop, or restart a service"
    }

    fn build(&self, params: serde_json::Value) -> Result<CommandSpec> {
        let action = require_str(&params, "action", self.name())?;
        if !matches!(action.as_str(), "start" | "stop" | "restart" | "status") {
            return Err(MusterError::CommandParams {
                command: self.name().to_string(),
                message: format!("unsupported service action '{action}'"),
            });
        }
        let service = require_str(&params, "name", self.name())?;
        Ok(CommandSpec::new("service", action)
            .with_params(serde_json::json!({ "service": service })))
    }
}

/// Manage a package on each node.
struct PackageCommand;

impl CommandHandler for PackageCommand {
    fn name(&self) -> &str {
        "package"
    }

    fn description(&self) -> &str {
        "Install, update, or remove a package"
    }

    fn build(&self, params: serde_json::Value) -> Result<CommandSpec> {
        let action = require_str(&params, "action", self.name())?;
        if !matches!(action.as_str(), "install" | "update" | "uninstall" | "status") {
            return Err(MusterError::CommandParams {
                command: self.name().to_string(),
                message: format!("unsupported package action '{action}'"),
            });
        }
        let package = require_str(&params, "name", self.name())?;
        Ok(CommandSpec::new("package", action)
            .with_params(serde_json::json!({ "package": package })))
    }
}
