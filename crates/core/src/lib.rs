//! Local-first dual-write sync engine for studydeck groups and cards.
//!
//! Repositories write to a local [`store::EntityStore`] and mirror each write
//! to a [`remote::RemoteService`] in the background. The
//! [`sync::SyncCoordinator`] reconciles both sides with last-writer-wins.

pub mod cards;
pub mod config;
pub mod entity;
pub mod errors;
pub mod groups;
pub mod remote;
pub mod repository;
pub mod session;
pub mod starter_pack;
pub mod store;
pub mod sync;

pub use errors::{Error, Result};
