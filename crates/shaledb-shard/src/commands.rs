//! Internal command dispatch.
//!
//! Commands are a `parse`/`authorize`/`execute` triple dispatched through a
//! registry keyed by command name. Parsing is the typed deserialization of
//! the request document inside each command's `execute`; authorization runs
//! before execution for every dispatch. All commands on this surface are
//! server-to-server and require internal authorization.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::ShardError;

/// Write concern attached to a command request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteConcern {
    /// The node's default write concern.
    Default,
    /// Majority acknowledgement required.
    Majority,
}

/// Caller context for a command invocation.
#[derive(Clone, Debug)]
pub struct CommandContext {
    /// Whether the caller holds the internal cluster action.
    pub authorized_internal: bool,
    /// The write concern the request was sent with.
    pub write_concern: WriteConcern,
}

impl CommandContext {
    /// Context for an internal server-to-server caller.
    pub fn internal() -> Self {
        CommandContext {
            authorized_internal: true,
            write_concern: WriteConcern::Default,
        }
    }

    /// Context for an external (client) caller.
    pub fn external() -> Self {
        CommandContext {
            authorized_internal: false,
            write_concern: WriteConcern::Default,
        }
    }

    /// Returns the same context with majority write concern.
    pub fn with_majority(mut self) -> Self {
        self.write_concern = WriteConcern::Majority;
        self
    }
}

/// Rejects callers that do not hold the internal cluster action.
pub fn require_internal(ctx: &CommandContext, name: &str) -> Result<(), ShardError> {
    if !ctx.authorized_internal {
        return Err(ShardError::Unauthorized(format!(
            "{} may only be invoked by cluster-internal callers",
            name
        )));
    }
    Ok(())
}

/// Rejects requests that were not sent with majority write concern.
pub fn require_majority(ctx: &CommandContext, name: &str) -> Result<(), ShardError> {
    if ctx.write_concern != WriteConcern::Majority {
        return Err(ShardError::InvalidOptions(format!(
            "{} requires majority write concern",
            name
        )));
    }
    Ok(())
}

/// Deserializes a command request into its typed argument struct.
pub fn parse_request<T: DeserializeOwned>(
    name: &str,
    request: serde_json::Value,
) -> Result<T, ShardError> {
    serde_json::from_value(request)
        .map_err(|e| ShardError::InvalidOptions(format!("malformed {} request: {}", name, e)))
}

/// A dispatchable command.
#[async_trait]
pub trait Command: Send + Sync {
    /// The command's registry name.
    fn name(&self) -> &'static str;

    /// Checks the caller's authorization.
    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError>;

    /// Parses the request document and executes the command.
    async fn execute(
        &self,
        ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError>;
}

/// Registry of commands keyed by name.
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        CommandRegistry {
            commands: HashMap::new(),
        }
    }

    /// Registers a command under its name, replacing any previous
    /// registration.
    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name(), command);
    }

    /// Returns the registered command names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Authorizes and executes the named command.
    pub async fn dispatch(
        &self,
        name: &str,
        ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let command = self
            .commands
            .get(name)
            .ok_or_else(|| ShardError::InvalidOptions(format!("unknown command '{}'", name)))?;
        command.authorize(ctx)?;
        command.execute(ctx, request).await
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
