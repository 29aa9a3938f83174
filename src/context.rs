//! Application Context
//!
//! The explicitly-constructed shared state every handler works against:
//! configuration, store, session registry, fan-out router, and the live
//! match table. Built once at startup and passed by clone; there is no
//! implicit process-wide state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::game::engine::MatchTable;
use crate::network::router::Router;
use crate::network::session::SessionRegistry;
use crate::store::Store;

/// Shared handles threaded through every component.
#[derive(Clone)]
pub struct AppContext {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Durable store.
    pub store: Arc<dyn Store>,
    /// Live session directory.
    pub registry: Arc<SessionRegistry>,
    /// Outbound fan-out.
    pub router: Arc<Router>,
    /// Live matches.
    pub matches: Arc<MatchTable>,
}

impl AppContext {
    /// Wire up a context over a config and store.
    pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let router = Arc::new(Router::new(registry.clone(), store.clone()));
        Self {
            config: Arc::new(config),
            store,
            registry,
            router,
            matches: Arc::new(MatchTable::new()),
        }
    }
}
