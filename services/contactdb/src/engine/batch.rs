//! Atomic execution of a batch of create/update/delete commands.
//!
//! # Purpose
//! Validates the batch envelope before touching storage, then runs every command inside one
//! transaction. The first failing command rolls back the whole batch; nothing of a failed
//! batch is ever persisted.
//!
//! # Error reporting
//! Schema violations are returned with their field paths. Every other failure is reported as
//! [`BatchError::CommitFailed`] and logged with full detail.
use crate::engine::Session;
use crate::engine::aggregate;
use crate::engine::error::{BatchError, EngineError, EngineResult};
use crate::model::CommandKind;
use crate::store::ContactStore;
use crate::wire;
use serde_json::Value;

pub const SHAPE_ERROR: &str = "Needs commands and orgs arrays of same length.";

/// Result of one command: the affected organisation id, if any.
pub type CommandResult = (CommandKind, Option<i64>);

/// One validated batch entry; the aggregate is still raw JSON.
#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub kind: CommandKind,
    pub org: Value,
}

/// Checks the `{commands, orgs}` envelope.
///
/// # Errors
/// - [`BatchError::BadRequest`] when either list is missing, empty or not a list, when the lists
///   differ in length, or when a command is not one of `create`, `update`, `delete`.
pub fn parse_batch(body: &Value) -> Result<Vec<BatchCommand>, BatchError> {
    let shape_error = || BatchError::BadRequest(SHAPE_ERROR.to_string());
    let commands = body
        .get("commands")
        .and_then(Value::as_array)
        .ok_or_else(shape_error)?;
    let orgs = body
        .get("orgs")
        .and_then(Value::as_array)
        .ok_or_else(shape_error)?;
    if commands.is_empty() || commands.len() != orgs.len() {
        return Err(shape_error());
    }

    commands
        .iter()
        .zip(orgs)
        .map(|(command, org)| {
            let kind = command
                .as_str()
                .and_then(|name| name.parse::<CommandKind>().ok())
                .ok_or_else(|| {
                    BatchError::BadRequest(format!(
                        "Unknown command {command}. Not in [create, update, delete]."
                    ))
                })?;
            Ok(BatchCommand {
                kind,
                org: org.clone(),
            })
        })
        .collect()
}

async fn run_command(session: &mut Session<'_>, command: &BatchCommand) -> EngineResult<Option<i64>> {
    let org = wire::parse_organisation(command.org.clone())?;
    match command.kind {
        CommandKind::Create => aggregate::create(session, &org).await.map(Some),
        CommandKind::Update => aggregate::update(session, &org).await.map(Some),
        CommandKind::Delete => aggregate::delete(session, &org).await,
    }
}

/// Applies `commands` in order inside a single transaction.
pub async fn execute_batch(
    store: &dyn ContactStore,
    user: &str,
    commands: &[BatchCommand],
) -> Result<Vec<CommandResult>, BatchError> {
    let mut tx = match store.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            tracing::warn!(error = %err, "failed to open transaction for batch");
            metrics::counter!("contactdb_batches_total", "outcome" => "unavailable").increment(1);
            return Err(BatchError::CommitFailed);
        }
    };

    let mut results = Vec::with_capacity(commands.len());
    let mut failure: Option<(usize, EngineError)> = None;
    {
        let mut session = Session {
            tx: tx.as_mut(),
            user,
        };
        for (index, command) in commands.iter().enumerate() {
            match run_command(&mut session, command).await {
                Ok(id) => results.push((command.kind, id)),
                Err(err) => {
                    failure = Some((index, err));
                    break;
                }
            }
        }
    }

    if let Some((index, err)) = failure {
        if let Err(rollback_err) = tx.rollback().await {
            tracing::warn!(error = %rollback_err, "rollback failed");
        }
        let command = &commands[index];
        tracing::info!(
            index,
            command = %command.kind,
            org = %command.org,
            user,
            error = %err,
            "commit failed"
        );
        return Err(match err {
            EngineError::Validation(violations) => {
                metrics::counter!("contactdb_batches_total", "outcome" => "invalid").increment(1);
                BatchError::Validation(violations)
            }
            EngineError::Commit(_) | EngineError::Store(_) => {
                metrics::counter!("contactdb_batches_total", "outcome" => "failed").increment(1);
                BatchError::CommitFailed
            }
        });
    }

    if let Err(err) = tx.commit().await {
        tracing::info!(user, error = %err, "commit failed");
        metrics::counter!("contactdb_batches_total", "outcome" => "failed").increment(1);
        return Err(BatchError::CommitFailed);
    }
    metrics::counter!("contactdb_batches_total", "outcome" => "committed").increment(1);
    tracing::info!(user, ?results, "commit successful");
    Ok(results)
}
