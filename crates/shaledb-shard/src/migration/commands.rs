//! Internal command surface for the migration destination.
//!
//! Five server-to-server commands drive the destination state machine:
//! `recv_chunk_start`, `recv_chunk_status`, `recv_chunk_commit`,
//! `recv_chunk_abort` and `recv_chunk_release_crit_sec`. All require
//! internal authorization; the release command additionally requires
//! majority write concern on the request.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::commands::{
    parse_request, require_internal, require_majority, Command, CommandContext, CommandRegistry,
};
use crate::error::ShardError;
use crate::migration::destination::{MigrationDestinationManager, StartReceiveRequest};
use crate::migration::MigrationSessionId;

fn to_reply<T: Serialize>(value: &T) -> Result<serde_json::Value, ShardError> {
    serde_json::to_value(value).map_err(|e| ShardError::Store(e.to_string()))
}

/// `recv_chunk_start`: begin receiving a chunk.
pub struct RecvChunkStartCommand {
    manager: Arc<MigrationDestinationManager>,
}

#[async_trait]
impl Command for RecvChunkStartCommand {
    fn name(&self) -> &'static str {
        "recv_chunk_start"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let args: StartReceiveRequest = parse_request(self.name(), request)?;
        self.manager.start(args).await?;
        Ok(json!({ "started": true }))
    }
}

#[derive(Deserialize)]
struct StatusArgs {
    #[serde(default)]
    wait_for_steady_or_done: bool,
}

/// `recv_chunk_status`: report progress, optionally blocking until steady
/// state or completion.
pub struct RecvChunkStatusCommand {
    manager: Arc<MigrationDestinationManager>,
}

#[async_trait]
impl Command for RecvChunkStatusCommand {
    fn name(&self) -> &'static str {
        "recv_chunk_status"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let args: StatusArgs = parse_request(self.name(), request)?;
        let progress = self.manager.status(args.wait_for_steady_or_done).await;
        to_reply(&progress)
    }
}

#[derive(Deserialize)]
struct CommitArgs {
    session_id: MigrationSessionId,
}

/// `recv_chunk_commit`: advance the receive to commit.
pub struct RecvChunkCommitCommand {
    manager: Arc<MigrationDestinationManager>,
}

#[async_trait]
impl Command for RecvChunkCommitCommand {
    fn name(&self) -> &'static str {
        "recv_chunk_commit"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let args: CommitArgs = parse_request(self.name(), request)?;
        let progress = self.manager.commit(args.session_id).await?;
        to_reply(&progress)
    }
}

#[derive(Deserialize)]
struct AbortArgs {
    #[serde(default)]
    session_id: Option<MigrationSessionId>,
}

/// `recv_chunk_abort`: abort the receive. Without a session id the abort
/// is unconditional.
pub struct RecvChunkAbortCommand {
    manager: Arc<MigrationDestinationManager>,
}

#[async_trait]
impl Command for RecvChunkAbortCommand {
    fn name(&self) -> &'static str {
        "recv_chunk_abort"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        let args: AbortArgs = parse_request(self.name(), request)?;
        let progress = self.manager.abort(args.session_id).await?;
        to_reply(&progress)
    }
}

#[derive(Deserialize)]
struct ReleaseArgs {
    session_id: MigrationSessionId,
}

/// `recv_chunk_release_crit_sec`: release the destination critical
/// section. Requires majority write concern.
pub struct RecvChunkReleaseCritSecCommand {
    manager: Arc<MigrationDestinationManager>,
}

#[async_trait]
impl Command for RecvChunkReleaseCritSecCommand {
    fn name(&self) -> &'static str {
        "recv_chunk_release_crit_sec"
    }

    fn authorize(&self, ctx: &CommandContext) -> Result<(), ShardError> {
        require_internal(ctx, self.name())
    }

    async fn execute(
        &self,
        ctx: &CommandContext,
        request: serde_json::Value,
    ) -> Result<serde_json::Value, ShardError> {
        require_majority(ctx, self.name())?;
        let args: ReleaseArgs = parse_request(self.name(), request)?;
        self.manager.release_critical_section(args.session_id)?;
        Ok(json!({ "ok": true }))
    }
}

/// Registers the five destination commands against the given manager.
pub fn register_migration_commands(
    registry: &mut CommandRegistry,
    manager: Arc<MigrationDestinationManager>,
) {
    registry.register(Arc::new(RecvChunkStartCommand {
        manager: manager.clone(),
    }));
    registry.register(Arc::new(RecvChunkStatusCommand {
        manager: manager.clone(),
    }));
    registry.register(Arc::new(RecvChunkCommitCommand {
        manager: manager.clone(),
    }));
    registry.register(Arc::new(RecvChunkAbortCommand {
        manager: manager.clone(),
    }));
    registry.register(Arc::new(RecvChunkReleaseCritSecCommand { manager }));
}
