//! CareLink data layer
//!
//! Local persistence and identity-scoped linking for sharing medication
//! records around a care target. Accounts register and sign in, create
//! care-target groups or join them with invite codes, pick an active
//! group, and record prescriptions against it. Everything is stored
//! through an asynchronous key-value adapter.

pub mod active;
pub mod analysis;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod linking;
pub mod repository;
pub mod state;
pub mod store;

pub use active::{ActiveTarget, ActiveTargetResolver};
pub use analysis::{AnalysisError, HttpAnalyzer, PrescriptionAnalyzer};
pub use config::Config;
pub use error::{CareError, ErrorKind};
pub use identity::{ExternalIdentity, IdentityManager, Session};
pub use linking::{LinkEngine, LinkOutcome};
pub use repository::{KvPrescriptionRepository, PrescriptionRepository, ScheduledItem};
pub use state::CareApp;
pub use store::{InMemoryKvStore, KeyLocks, KvStore, RecordStore, SqliteStore, StoreResult};
