use dashmap::DashMap;
use std::sync::Arc;

use crate::db::DbPool;
use crate::ws::rooms::Rooms;

/// Shared application state passed to all handlers via axum State extractor.
///
/// Everything in-memory here (rooms, presence counters) is transient and
/// reconstructible from the store plus the live connections — safe to
/// drop and rebuild on restart.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Room membership for live fan-out
    pub rooms: Arc<Rooms>,
    /// Live session count per user id (presence reference counting)
    pub presence: Arc<DashMap<String, usize>>,
    /// Data directory (database, JWT key, uploads)
    pub data_dir: String,
    /// Frontend origin for CORS and the SSO redirect
    pub frontend_origin: String,
}
