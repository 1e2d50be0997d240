//! Farminizer Core - Render-Farm Export
//!
//! # Export Rules
//! 1. Every export re-runs the full check
//! 2. Errors block export; warnings never do
//! 3. Every scene mutation is recorded and restored
//! 4. Staged files get unique logical paths
//! 5. The descriptor is written last

pub mod config;
pub mod descriptor;
pub mod hashing;
pub mod ledger;
pub mod manifest;
pub mod memory;
pub mod paths;
pub mod pipeline;
pub mod remediation;
pub mod results;
pub mod scene;
pub mod validators;

pub use config::{ClientSettings, ConfigError, ForeignManifest, JobOptions};
pub use descriptor::JobDescriptor;
pub use hashing::{canonical_json, compute_manifest_hash, file_sha256};
pub use ledger::MutationLedger;
pub use manifest::{Asset, AssetManifest};
pub use memory::MemoryScene;
pub use pipeline::{ExportOutcome, Orchestrator, PipelineError, PipelineState};
pub use remediation::RemediationRegistry;
pub use results::{DiagnosticEntry, RemediationType, ResultLog, Severity};
pub use scene::{HostCapabilities, SceneAccessor, SceneError};
pub use validators::{RemediationOutcome, Validator, ValidatorContext};

pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
