//! Common test utilities for CareLink integration tests
#![allow(dead_code)]

use std::sync::Arc;

use carelink_core::Role;
use carelink_store::{CareApp, Config, InMemoryKvStore, Session, SqliteStore};
use tempfile::TempDir;

pub const PASSWORD: &str = "secret1";

/// Config with the cheapest bcrypt cost
pub fn test_config() -> Config {
    Config {
        bcrypt_cost: 4,
        ..Config::default()
    }
}

/// App over a fresh in-memory store; the store handle is returned for
/// direct inspection and fault injection
pub fn create_test_app() -> (CareApp<InMemoryKvStore>, Arc<InMemoryKvStore>) {
    let store = Arc::new(InMemoryKvStore::new());
    (CareApp::new(store.clone(), test_config()), store)
}

/// App over an existing store, as after a process restart
pub fn reopen_app(store: &Arc<InMemoryKvStore>) -> CareApp<InMemoryKvStore> {
    CareApp::new(store.clone(), test_config())
}

/// SQLite store in a temporary directory
pub fn create_test_store() -> (SqliteStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
    (store, dir) // Return dir to keep it alive
}

/// Register an account with the default test password
pub async fn register(app: &CareApp<InMemoryKvStore>, email: &str, role: Role) -> Session {
    app.identity().register(email, PASSWORD, role).await.unwrap()
}
