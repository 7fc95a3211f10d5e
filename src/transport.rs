//! Transport seam between the script layer and the remote store
//!
//! The store client itself lives outside this crate. Anything that can run
//! `EVALSHA`, `EVAL` and `SCRIPT LOAD` against a store implements
//! [`ScriptTransport`]; a [`Connection`] pairs one such transport with the
//! identity under which its script uploads are tracked.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::script::load_cache::{ConnectionLoadCache, LoadCacheRegistry};

/// Failure reported by the store or the wire
///
/// The store reports conditions such as an unknown script hash as plain
/// text, so the message is kept verbatim. Cloneable so that every waiter on
/// a shared upload observes the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Operations the script layer needs from a store connection
#[async_trait]
pub trait ScriptTransport: Send + Sync {
    /// Execute a previously uploaded script by its content hash (`EVALSHA`)
    async fn eval_by_hash(
        &self,
        hash: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Value, TransportError>;

    /// Execute a script by sending its full source (`EVAL`)
    async fn eval_source(
        &self,
        source: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Value, TransportError>;

    /// Upload a script without running it (`SCRIPT LOAD`), returning the hash
    /// the store assigned to it
    async fn load_source(&self, source: &str) -> Result<String, TransportError>;
}

/// Stable identity of one store connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a process-unique identifier
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An open store connection together with its script load cache
///
/// The load cache is registered when the connection is opened and discarded
/// again by [`Connection::close`]; caches are never shared between
/// connections.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    transport: Arc<dyn ScriptTransport>,
    load_cache: Arc<ConnectionLoadCache>,
    registry: LoadCacheRegistry,
}

impl Connection {
    /// Open a connection and register its load cache in `registry`
    pub fn open(transport: Arc<dyn ScriptTransport>, registry: &LoadCacheRegistry) -> Self {
        let id = ConnectionId::next();
        let load_cache = registry.register(id);

        Self {
            id,
            transport,
            load_cache,
            registry: registry.clone(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn transport(&self) -> &dyn ScriptTransport {
        self.transport.as_ref()
    }

    pub(crate) fn transport_handle(&self) -> Arc<dyn ScriptTransport> {
        Arc::clone(&self.transport)
    }

    pub fn load_cache(&self) -> &ConnectionLoadCache {
        &self.load_cache
    }

    /// Close the connection, dropping everything known about which scripts
    /// the store has cached for it
    pub fn close(self) {
        self.registry.discard(self.id);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("loaded_scripts", &self.load_cache.len())
            .finish()
    }
}
