#![warn(missing_docs)]

//! ShaleDB coordination subsystem: durable resumable DDL coordinators
//! (drop collection, drop database, index commit, compact) and the
//! participant command surface they drive.

pub mod clients;
pub mod commands;
pub mod compact;
pub mod document;
pub mod drop_collection;
pub mod drop_database;
pub mod index_commit;
pub mod participant;
pub mod runner;

pub use clients::{CatalogClient, ClusterClock, LocalCatalog, ShardClient};
pub use document::{CoordinatorDocument, CoordinatorStore, RetryableSession};
pub use drop_collection::{DropCollectionArgs, DropCollectionCoordinator, DropCollectionPhase};
pub use drop_database::{DropDatabaseArgs, DropDatabaseCoordinator, DropDatabasePhase};
pub use runner::{Coordinator, CoordinatorRunner, RetryPolicy};
