//! # mspsync Core
//!
//! Provider adapters, credential encryption and sync orchestration for
//! mspsync, an integration engine that mirrors PSA and RMM platforms into a
//! local warehouse.
//!
//! ## Overview
//!
//! - **Canonical domain models** for companies, contacts, tickets, devices,
//!   alerts and installed software
//! - **Provider adapters** for nine upstream platforms behind two traits
//! - **HTTP plumbing** with retries, throttling, OAuth2 tokens and an
//!   outbound URL guard
//! - **Secrets** sealed with AES-256-GCM under a master key, with key rotation
//! - **Sync orchestrator** that maps upstream ids to local records
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | One adapter per upstream platform |
//! | [`config`] | Engine settings from environment variables |
//! | [`credentials`] | Typed per-provider credential structs |
//! | [`domain`] | Canonical records and timestamps |
//! | [`error`] | Validation and orchestration errors |
//! | [`http`] | Transport, retry, throttle, OAuth and URL guard |
//! | [`provider`] | Adapter traits, list requests, provider errors |
//! | [`provider_type`] | Provider identifiers and families |
//! | [`registry`] | Adapter construction from stored connections |
//! | [`secrets`] | Field encryption and key rotation |
//! | [`sync`] | Orchestrator, reports, audit, connection registration |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mspsync_core::config::EngineConfig;
//! use mspsync_core::sync::{SyncOptions, SyncOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env()?;
//!     let orchestrator = SyncOrchestrator::from_config(&config)?;
//!     let batch = orchestrator
//!         .sync_all(&SyncOptions::default(), CancellationToken::new())
//!         .await?;
//!     println!("{} connections synced", batch.succeeded);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Adapters fail with [`ProviderError`], whose [`ProviderErrorKind`] and
//! stable `code()` say what went wrong upstream:
//!
//! ```rust
//! use mspsync_core::{ProviderError, ProviderErrorKind};
//!
//! fn should_page_operator(error: &ProviderError) -> bool {
//!     matches!(
//!         error.kind(),
//!         ProviderErrorKind::Authentication | ProviderErrorKind::InvalidCredentials
//!     )
//! }
//! ```
//!
//! ## Security
//!
//! - Credentials are decrypted only to build an adapter and never logged
//! - Operator-supplied base URLs are resolved and checked against internal
//!   address ranges before any request
//! - Every warehouse query binds its values as parameters

pub mod adapters;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod http;
pub mod provider;
pub mod provider_type;
pub mod registry;
pub mod secrets;
pub mod sync;

// Domain models
pub use domain::{
    change_hash, Alert, AlertSeverity, AlertStatus, Company, Contact, Device, DeviceType, OsType,
    SoftwareItem, Ticket, TicketPriority, TicketStatus, UtcDateTime,
};

// Errors
pub use error::{SyncError, ValidationError};

// Provider contract
pub use provider::{
    Capabilities, EntityKind, FetchBatch, ListRequest, Provider, ProviderError, ProviderErrorKind,
    PsaProvider, RejectedRecord, RmmProvider,
};
pub use provider_type::{ProviderFamily, ProviderType};

// Construction and orchestration
pub use registry::{AnyProvider, ProviderRegistry};
pub use secrets::{EncryptionError, SecretsManager};
pub use sync::{SyncOptions, SyncOrchestrator};

// Warehouse (re-exported from mspsync-warehouse)
pub use mspsync_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
