/// Execute-by-hash with a single load-and-retry on an unknown script
///
/// The store reports a missing script as plain text (`NOSCRIPT ...`), so the
/// only error this module absorbs is one whose message contains that marker.
/// Per call there is at most one upload attempt and at most two executions.
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::definition::ScriptDefinition;
use crate::error::ScriptError;
use crate::logging::{operations, services, status};
use crate::transport::{Connection, TransportError};

/// Marker the store puts in its reply when a hash has no script
pub const SCRIPT_UNKNOWN_MARKER: &str = "noscript";

/// Whether `err` is the store saying it does not know the script
pub fn is_script_unknown(err: &TransportError) -> bool {
    err.message
        .to_ascii_lowercase()
        .contains(SCRIPT_UNKNOWN_MARKER)
}

/// Run `definition` on `connection` by hash, uploading it once if the store
/// does not have it yet
pub async fn execute(
    connection: &Connection,
    definition: &ScriptDefinition,
    keys: &[String],
    args: &[String],
) -> Result<Value, ScriptError> {
    let hash = definition.hash();
    let transport = connection.transport();

    let err = match transport.eval_by_hash(hash, keys, args).await {
        Ok(value) => {
            debug!(
                service = services::ENGINE,
                operation = operations::EVAL,
                status = status::SUCCESS,
                script = definition.name(),
                hash = %hash,
                "script executed"
            );
            return Ok(value);
        }
        Err(err) => err,
    };

    if !is_script_unknown(&err) {
        warn!(
            service = services::ENGINE,
            operation = operations::EVAL,
            status = status::ERROR,
            script = definition.name(),
            hash = %hash,
            error = %err,
            "script execution failed"
        );
        return Err(err.into());
    }

    debug!(
        service = services::ENGINE,
        operation = operations::EVAL,
        status = status::MISS,
        script = definition.name(),
        hash = %hash,
        connection = %connection.id(),
        "store does not have script, loading"
    );
    ensure_loaded(connection, hash, definition.source()).await?;

    let value = transport.eval_by_hash(hash, keys, args).await?;
    debug!(
        service = services::ENGINE,
        operation = operations::EVAL,
        status = status::SUCCESS,
        script = definition.name(),
        hash = %hash,
        "script executed after load"
    );
    Ok(value)
}

/// Upload `source` over `connection` unless its load cache already has `hash`
pub async fn ensure_loaded(
    connection: &Connection,
    hash: &str,
    source: &str,
) -> Result<(), TransportError> {
    let transport = connection.transport_handle();
    let source: Arc<str> = Arc::from(source);
    let expected = hash.to_string();

    connection
        .load_cache()
        .ensure_loaded(hash, move || async move {
            let stored = transport.load_source(&source).await?;
            if !stored.eq_ignore_ascii_case(&expected) {
                warn!(
                    service = services::LOAD_CACHE,
                    operation = operations::LOAD,
                    expected = %expected,
                    stored = %stored,
                    "store hashed script differently"
                );
            }
            Ok(())
        })
        .await
}

/// Run `definition` by sending its full source, bypassing the hash path
pub async fn execute_source(
    connection: &Connection,
    definition: &ScriptDefinition,
    keys: &[String],
    args: &[String],
) -> Result<Value, ScriptError> {
    connection
        .transport()
        .eval_source(definition.source(), keys, args)
        .await
        .map_err(ScriptError::from)
}
