// Library interface for scriptcache
// Scripts are defined once and executed by content hash against a remote store

pub mod config;
pub mod error;
pub mod logging;
pub mod script;
pub mod transport;

// Re-export commonly used types
pub use error::ScriptError;
pub use script::{
    validators, CompiledTemplate, LoadCachePolicy, LoadCacheRegistry, LuaToken, Script,
    ScriptDefinition, ScriptInput, ScriptOptions, ScriptSource,
};
pub use transport::{Connection, ConnectionId, ScriptTransport, TransportError};
