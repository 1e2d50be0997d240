//! Validators - One Per Concern
//!
//! `test` inspects, `prepare_save` mutates (through its ledger) and stages
//! assets, `post_save` undoes every mutation it made.

pub mod assets;
pub mod caches;
pub mod exclusion;
pub mod general;
pub mod render_settings;

use std::path::{Path, PathBuf};

use crate::config::{ClientSettings, ForeignManifest, JobOptions};
use crate::descriptor::JobDescriptor;
use crate::manifest::AssetManifest;
use crate::pipeline::PipelineError;
use crate::results::{DiagnosticEntry, ResultWriter};
use crate::scene::{HostCapabilities, SceneAccessor, SceneError};

pub use assets::TextureAndCacheValidator;
pub use exclusion::RendererExclusionValidator;
pub use general::GeneralValidator;
pub use render_settings::RenderSettingsValidator;

/// Read-only state shared by every validator during one cycle.
#[derive(Debug, Clone)]
pub struct ValidatorContext {
    pub settings: ClientSettings,
    pub options: JobOptions,
    pub capabilities: HostCapabilities,
    pub foreign_manifest: ForeignManifest,
}

impl ValidatorContext {
    pub fn user(&self) -> &str {
        &self.settings.user_name
    }

    pub fn distributed(&self) -> bool {
        self.options.distributed
    }

    /// Where a texture of the same name already staged by another project
    /// would sit.
    pub fn staged_path(&self, filename: &str) -> PathBuf {
        self.settings.staging_folder().join(filename)
    }
}

/// Mutable sinks handed to `prepare_save`.
pub struct ExportContext<'a> {
    pub validator: &'a ValidatorContext,
    pub export_folder: &'a Path,
    pub assets: &'a mut AssetManifest,
    pub descriptor: &'a mut JobDescriptor,
}

/// Result of a guided fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// Scene changed; number of properties touched.
    Applied(usize),
    /// Nothing to do automatically; show the message.
    Surfaced(String),
}

pub trait Validator {
    /// Group label used to cluster results.
    fn name(&self) -> &'static str;

    fn test(&self, scene: &dyn SceneAccessor, ctx: &ValidatorContext, results: &mut ResultWriter<'_>);

    fn prepare_save(
        &mut self,
        scene: &mut dyn SceneAccessor,
        export: &mut ExportContext<'_>,
    ) -> Result<(), PipelineError>;

    fn post_save(&mut self, scene: &mut dyn SceneAccessor) -> Result<(), SceneError>;

    /// Mutations recorded and not yet restored.
    fn pending_restores(&self) -> usize;

    /// Whether a fast check leaves this validator out.
    fn skipped_by_fast_check(&self) -> bool {
        false
    }

    fn further_action(
        &mut self,
        _scene: &mut dyn SceneAccessor,
        _ctx: &ValidatorContext,
        entry: &DiagnosticEntry,
    ) -> Result<RemediationOutcome, SceneError> {
        Ok(RemediationOutcome::Surfaced(entry.message.clone()))
    }
}
