#![deny(missing_docs)]
//! # armorclaw-types — shared vocabulary for the ArmorClaw bridge
//!
//! The bridge brokers traffic between a chat-room control plane and
//! short-lived sandboxed workers. This crate holds the types every other
//! crate in the workspace speaks:
//!
//! | Module | What it holds |
//! |--------|---------------|
//! | [`id`] | Typed ID wrappers ([`CredentialId`], [`WorkerId`], [`RoomId`], …) |
//! | [`error`] | The [`BridgeError`] taxonomy shared across subsystems |
//! | [`event`] | [`RoomEvent`] — the control-plane message shape |
//! | [`audit`] | [`Actor`], [`Resource`], [`Severity`], [`ComplianceInfo`] |
//! | [`provider`] | The [`Provider`] enum and its worker env-var mapping |
//! | [`secret`] | [`SecretString`] — zero-on-drop plaintext wrapper |
//! | [`lifecycle`] | [`LifecycleState`] — the bridge state machine vocabulary |
//! | [`config`] | [`BridgeConfig`] — bootstrap configuration |
//!
//! ## Design
//!
//! Components depend on this crate and on each other only through traits
//! passed at construction. No type here holds a back-reference to a
//! subsystem, which keeps the dependency graph acyclic.

pub mod audit;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod lifecycle;
pub mod provider;
pub mod secret;

// Re-exports for convenience
pub use audit::{Actor, ActorType, ComplianceInfo, Resource, Severity};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use event::RoomEvent;
pub use id::{CredentialId, EventId, RoomId, SenderId, SubscriberId, WorkerId};
pub use lifecycle::LifecycleState;
pub use provider::Provider;
pub use secret::SecretString;
