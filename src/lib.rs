//! esbox: embedded Elasticsearch for integration tests.
//!
//! Downloads a server distribution once into a shared cache (safe across
//! parallel test processes), installs it with the requested plugins, starts
//! the process and watches its logs for readiness, then hands out an
//! idempotent HTTP client for indices, templates and documents:
//!
//! - [`ArtifactCache`]: archive acquisition with cross-process safety
//! - [`Installer`]: extraction, configuration, plugin reconciliation
//! - [`ElasticServer`]: process supervision and log-driven readiness
//! - [`ElasticClient`]: create-if-absent / delete-if-present operations,
//!   bulk indexing and search
//! - [`EmbeddedElastic`]: the facade wiring the four together
//!
//! Most callers only need the facade:
//!
//! ```no_run
//! # async fn example() -> esbox::Result<()> {
//! let elastic = esbox::EmbeddedElastic::builder()
//!     .with_elastic_version("6.8.0")
//!     .start()
//!     .await?;
//! // ... drive it through elastic.client() ...
//! elastic.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod client;
pub mod config;
pub mod embedded;
pub mod error;
pub mod install;
pub mod server;
pub mod version;

pub use artifact::ArtifactCache;
pub use client::{
    DocumentWithId, ElasticClient, IndexDescriptor, IndexRequest, TemplateDescriptor,
};
pub use config::{
    InstallationConfig, InstallationSource, InstanceSettings, JavaHomeOption, PluginRequest,
};
pub use embedded::{EmbeddedElastic, EmbeddedElasticBuilder};
pub use error::{Error, Result};
pub use install::{Installation, Installer};
pub use server::{ElasticServer, ServerState};
pub use version::Version;
