//! Export Pipeline - Single Entry Point
//!
//! CRITICAL: export MUST re-run the full check before touching the scene,
//! and MUST hand every mutated property back, whether the save succeeded
//! or not.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{ClientSettings, ForeignManifest, JobOptions};
use crate::descriptor::JobDescriptor;
use crate::hashing::{compute_manifest_hash, file_sha256};
use crate::manifest::AssetManifest;
use crate::paths::{export_project_name, farm_output_path, file_name, unique_filename};
use crate::remediation::RemediationRegistry;
use crate::results::{ReportEnvironment, ResultLog};
use crate::scene::{HostCapabilities, SceneAccessor, SceneError};
use crate::validators::render_settings::REGION_SECTION;
use crate::validators::{
    ExportContext, GeneralValidator, RemediationOutcome, RenderSettingsValidator,
    RendererExclusionValidator, TextureAndCacheValidator, Validator, ValidatorContext,
};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static CHECK_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_check_call_count() -> u32 {
    CHECK_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_check_call_count() {
    CHECK_CALL_COUNT.store(0, Ordering::SeqCst);
}

pub const FILES_SECTION: &str = "files";
pub const CHECKSUM_SECTION: &str = "checksum";
pub const SEPARATE_JOBS_SECTION: &str = "SeparateJobs";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Distributed rendering has not been confirmed")]
    DistributedNotConfirmed,

    #[error("No diagnostic at index {0}")]
    UnknownEntry(usize),

    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("Failed to restore scene after export: {0}")]
    Restore(#[source] SceneError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Checking,
    Invalid,
    Valid,
    Exporting,
    Exported,
    ExportFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    /// Saved copy of the project inside the export folder.
    pub project_path: PathBuf,
    pub descriptor_path: PathBuf,
    pub manifest: AssetManifest,
    pub manifest_hash: String,
}

/// Drives the validators through check and export cycles.
pub struct Orchestrator {
    settings: Option<ClientSettings>,
    options: JobOptions,
    validators: Vec<Box<dyn Validator>>,
    remediation: RemediationRegistry,
    results: ResultLog,
    state: PipelineState,
}

impl Orchestrator {
    /// `settings` is `None` when the client settings file could not be read.
    pub fn new(settings: Option<ClientSettings>, options: JobOptions) -> Self {
        Self::with_validators(
            settings,
            options,
            vec![
                Box::new(GeneralValidator),
                Box::new(RenderSettingsValidator::new()),
                Box::new(TextureAndCacheValidator::new()),
                Box::new(RendererExclusionValidator),
            ],
        )
    }

    /// Validators run in the given order for every phase.
    pub fn with_validators(
        settings: Option<ClientSettings>,
        options: JobOptions,
        validators: Vec<Box<dyn Validator>>,
    ) -> Self {
        Self {
            settings,
            options,
            validators,
            remediation: RemediationRegistry::with_defaults(),
            results: ResultLog::new(),
            state: PipelineState::Idle,
        }
    }

    pub fn remediation_mut(&mut self) -> &mut RemediationRegistry {
        &mut self.remediation
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn results(&self) -> &ResultLog {
        &self.results
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Mutations still outstanding across all validators.
    pub fn pending_restores(&self) -> usize {
        self.validators.iter().map(|v| v.pending_restores()).sum()
    }

    fn set_state(&mut self, state: PipelineState) {
        log::info!("pipeline {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn context(&self, scene: &dyn SceneAccessor) -> ValidatorContext {
        let settings = self.settings.clone().unwrap_or_default();
        let foreign_manifest = if settings.default_path.as_os_str().is_empty() {
            ForeignManifest::default()
        } else {
            ForeignManifest::load(&settings.foreign_manifest_path())
        };
        ValidatorContext {
            capabilities: HostCapabilities::for_version(&scene.project().host_version),
            settings,
            options: self.options.clone(),
            foreign_manifest,
        }
    }

    /// Runs every validator's check against `scene`.
    ///
    /// A fast check leaves out the texture and cache scan. Returns whether
    /// the resulting log is valid.
    pub fn check(&mut self, scene: &dyn SceneAccessor, fast: bool) -> bool {
        #[cfg(feature = "test-hooks")]
        CHECK_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        self.set_state(PipelineState::Checking);
        self.results.clear();
        let ctx = self.context(scene);

        {
            let mut system = self.results.writer(None);
            if self.settings.is_none() {
                system.error("Client settings could not be found, please reinstall the plugin from the farm manager!");
            }
            if ctx.user().is_empty() {
                system.error("You are not logged in correctly, please login from the farm manager first!");
            }
            if fast {
                system.info("No textures have been checked. To finally export click 'Upload to Farm'");
            }
            if ctx.distributed() {
                system.info("Doing a distributed rendering");
            }
        }

        if !fast {
            launch_manager(&ctx.settings, &self.options);
        }

        for validator in &self.validators {
            if fast && validator.skipped_by_fast_check() {
                continue;
            }
            let mut writer = self.results.writer(Some(validator.name()));
            validator.test(scene, &ctx, &mut writer);
        }

        if self.results.is_empty() {
            self.results.writer(None).info("No errors or warnings found");
        }

        let valid = self.results.is_valid();
        self.set_state(if valid { PipelineState::Valid } else { PipelineState::Invalid });
        valid
    }

    /// Exports `scene` into the user's export folder.
    ///
    /// Always re-checks first; an invalid scene is never mutated. Once any
    /// validator has prepared, every prepared validator is restored before
    /// this returns, on success and on failure alike.
    pub fn export(&mut self, scene: &mut dyn SceneAccessor) -> Result<ExportOutcome, PipelineError> {
        if self.options.distributed && !self.options.distributed_confirmed {
            return Err(PipelineError::DistributedNotConfirmed);
        }

        if let Err(e) = scene.unpack_all() {
            log::warn!("unpacking data blocks failed: {}", e);
        }

        // MANDATORY: the full check gates every export.
        if !self.check(&*scene, false) {
            self.set_state(PipelineState::ExportFailed);
            let messages: Vec<String> = self.results.errors().map(|e| e.message.clone()).collect();
            return Err(PipelineError::ValidationFailed(messages.join("; ")));
        }

        self.set_state(PipelineState::Exporting);
        let ctx = self.context(&*scene);
        match self.run_export(scene, &ctx) {
            Ok(outcome) => {
                self.results.writer(None).info("Project has been successfully exported!");
                self.set_state(PipelineState::Exported);
                Ok(outcome)
            }
            Err(e) => {
                log::warn!("export failed: {}", e);
                self.set_state(PipelineState::ExportFailed);
                Err(e)
            }
        }
    }

    fn run_export(
        &mut self,
        scene: &mut dyn SceneAccessor,
        ctx: &ValidatorContext,
    ) -> Result<ExportOutcome, PipelineError> {
        let export_folder = ctx.settings.export_folder();
        fs::create_dir_all(&export_folder)?;

        let project_name = export_project_name(&scene.project().filepath);
        let stem = Path::new(&project_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();
        let project_path = unique_filename(&export_folder, &stem, ".blend");

        if let Err(e) = scene.make_local_all() {
            log::warn!("making linked data local failed: {}", e);
        }
        scene.make_paths_absolute()?;

        let mut prepared = 0;
        let saved = save_sequence(
            &mut self.validators,
            scene,
            ctx,
            &export_folder,
            &project_path,
            &mut prepared,
        );

        let mut restore_error = None;
        for validator in self.validators.iter_mut().take(prepared) {
            if let Err(e) = validator.post_save(scene) {
                log::warn!("{} failed to restore: {}", validator.name(), e);
                restore_error.get_or_insert(e);
            }
        }

        let (manifest, manifest_hash, descriptor_path) = saved?;
        if let Some(e) = restore_error {
            return Err(PipelineError::Restore(e));
        }

        Ok(ExportOutcome {
            job_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            project_path,
            descriptor_path,
            manifest,
            manifest_hash,
        })
    }

    /// Guided fix for the diagnostic at `index`.
    pub fn further_action(
        &mut self,
        scene: &mut dyn SceneAccessor,
        index: usize,
    ) -> Result<RemediationOutcome, PipelineError> {
        let entry = self
            .results
            .get(index)
            .cloned()
            .ok_or(PipelineError::UnknownEntry(index))?;
        let ctx = self.context(&*scene);

        if let Some(handler) = entry.remediation.and_then(|code| self.remediation.handler(code)) {
            return Ok(handler(scene, &ctx, &entry)?);
        }

        let owner = entry.source.as_deref();
        match self.validators.iter_mut().find(|v| Some(v.name()) == owner) {
            Some(validator) => Ok(validator.further_action(scene, &ctx, &entry)?),
            None => Ok(RemediationOutcome::Surfaced(entry.message.clone())),
        }
    }

    /// Plain-text report of the current log.
    pub fn report(&self, scene: &dyn SceneAccessor) -> String {
        let project = scene.project();
        self.results.render_report(&ReportEnvironment {
            document: file_name(&project.filepath),
            original_path: project.filepath.clone(),
            host_version: project.host_version.to_string(),
            os: std::env::consts::OS.to_string(),
            written_at: Utc::now(),
        })
    }

    /// Writes [`Orchestrator::report`] to `path`.
    pub fn write_report(&self, scene: &dyn SceneAccessor, path: &Path) -> Result<(), PipelineError> {
        fs::write(path, self.report(scene))?;
        Ok(())
    }
}

/// Everything between the first `prepare_save` and the descriptor write.
/// `prepared` counts validators whose `prepare_save` was entered.
fn save_sequence(
    validators: &mut [Box<dyn Validator>],
    scene: &mut dyn SceneAccessor,
    ctx: &ValidatorContext,
    export_folder: &Path,
    project_path: &Path,
    prepared: &mut usize,
) -> Result<(AssetManifest, String, PathBuf), PipelineError> {
    let mut assets = AssetManifest::new();
    let mut descriptor = JobDescriptor::new();
    descriptor.section(REGION_SECTION);

    {
        let mut export = ExportContext {
            validator: ctx,
            export_folder,
            assets: &mut assets,
            descriptor: &mut descriptor,
        };
        for validator in validators.iter_mut() {
            *prepared += 1;
            validator.prepare_save(scene, &mut export)?;
        }
    }

    add_job_options(&mut descriptor, scene, &ctx.options);
    if ctx.options.batch_render {
        add_batch_sections(&mut descriptor, scene, ctx.user());
    }

    scene.save_copy(project_path)?;

    let files = descriptor.section(FILES_SECTION);
    for (i, asset) in assets.assets().iter().enumerate() {
        files.set(format!("path{}", i), asset.logical_path.clone());
        files.set(format!("pathlocal{}", i), asset.source_path.display().to_string());
        files.set(format!("pathsize{}", i), asset.size_bytes.to_string());
    }
    files.set("paths", assets.len().to_string());

    let manifest_hash = compute_manifest_hash(&assets)?;
    let checksum = descriptor.section(CHECKSUM_SECTION);
    checksum.set("check", file_sha256(project_path)?);
    checksum.set("scenesize", fs::metadata(project_path)?.len().to_string());
    checksum.set("manifest", manifest_hash.clone());

    let mut descriptor_path = project_path.as_os_str().to_owned();
    descriptor_path.push(".txt");
    let descriptor_path = PathBuf::from(descriptor_path);
    descriptor.write_to_file(&descriptor_path)?;
    log::info!("wrote job descriptor {}", descriptor_path.display());

    Ok((assets, manifest_hash, descriptor_path))
}

fn add_job_options(descriptor: &mut JobDescriptor, scene: &dyn SceneAccessor, options: &JobOptions) {
    let render = scene.render();
    let region = descriptor.section(REGION_SECTION);

    if options.distributed && render.frame_start == render.frame_end {
        region.set("singleframeBlenderIntern", "1");
    }
    if options.auto_start {
        region.set("autostart", "1");
    }
    if options.priority != "1" {
        region.set("prio", options.priority.clone());
    }
    if options.send_email && options.notify_on_finish {
        region.set("notifyComplete", "1");
    }
    if !options.send_email {
        region.set("notifyCompletedit", "True");
    }
    if options.send_email && options.notify_on_start {
        region.set("notifyStart", "1");
    }
    if options.cost_estimation {
        region.set("estimationFrames", "3");
        region.set("autostart", "1");
    }
}

fn add_batch_sections(descriptor: &mut JobDescriptor, scene: &dyn SceneAccessor, user: &str) {
    let batch = scene.batch_scenes();

    let jobs = descriptor.section(SEPARATE_JOBS_SECTION);
    for (i, job) in batch.iter().enumerate() {
        jobs.set(format!("section{}", i), job.name.clone());
    }

    for job in batch {
        let format = if job.file_format.is_empty() {
            scene.render().file_format.as_str()
        } else {
            job.file_format.as_str()
        };
        let section = descriptor.section(&job.name);
        section.set("resolution", format!("{}x{}", job.resolution_x, job.resolution_y));
        section.set("frames", format!("{} {} 1", job.frame_start, job.frame_end));
        section.set("rangestep", "1");
        section.set(
            "output",
            format!("{}.{}", farm_output_path(user, &job.filepath), format),
        );
        if let Some(camera) = &job.camera {
            section.set("camera", camera.clone());
        }
        section.set("take", job.name.clone());
    }
}

/// Starts the farm manager unless it is already running.
fn launch_manager(settings: &ClientSettings, options: &JobOptions) {
    if !options.launch_manager
        || settings.default_path.as_os_str().is_empty()
        || settings.manager_path.as_os_str().is_empty()
        || settings.manager_running_marker().exists()
    {
        return;
    }
    match Command::new(&settings.manager_path).spawn() {
        Ok(child) => log::info!("started farm manager (pid {})", child.id()),
        Err(e) => log::warn!("could not start farm manager {}: {}", settings.manager_path.display(), e),
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(None, JobOptions::default())
    }
}
