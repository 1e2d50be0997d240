//! Guided Fixes - Remediation Code To Handler
//!
//! Each diagnostic may carry a [`RemediationType`]. The registry maps those
//! codes straight to handler functions; codes without a handler fall back to
//! the owning validator.

use std::collections::HashMap;

use crate::results::{DiagnosticEntry, RemediationType};
use crate::scene::{DataBlockKind, OwnerRef, SceneAccessor, SceneError};
use crate::validators::assets::physical_files;
use crate::validators::{RemediationOutcome, ValidatorContext};

pub type RemediationHandler = Box<
    dyn Fn(&mut dyn SceneAccessor, &ValidatorContext, &DiagnosticEntry)
        -> Result<RemediationOutcome, SceneError>,
>;

#[derive(Default)]
pub struct RemediationRegistry {
    handlers: HashMap<RemediationType, RemediationHandler>,
}

impl std::fmt::Debug for RemediationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<u8> = self.handlers.keys().map(|t| t.code()).collect();
        codes.sort_unstable();
        f.debug_struct("RemediationRegistry").field("codes", &codes).finish()
    }
}

impl RemediationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the fixes this crate can apply without the host's own
    /// operators.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(RemediationType::DisableRenderBorder, Box::new(disable_render_border));
        registry.register(RemediationType::ReplaceMissingImage, Box::new(replace_missing_files));
        registry
    }

    /// Replaces any handler already registered for `code`.
    pub fn register(&mut self, code: RemediationType, handler: RemediationHandler) {
        self.handlers.insert(code, handler);
    }

    pub fn handler(&self, code: RemediationType) -> Option<&RemediationHandler> {
        self.handlers.get(&code)
    }

    pub fn contains(&self, code: RemediationType) -> bool {
        self.handlers.contains_key(&code)
    }
}

fn disable_render_border(
    scene: &mut dyn SceneAccessor,
    _ctx: &ValidatorContext,
    _entry: &DiagnosticEntry,
) -> Result<RemediationOutcome, SceneError> {
    if !scene.render().use_border {
        return Ok(RemediationOutcome::Applied(0));
    }
    scene.write_property(&OwnerRef::Render, "use_border", "false")?;
    Ok(RemediationOutcome::Applied(1))
}

/// Points every image whose file is missing at the placeholder image.
fn replace_missing_files(
    scene: &mut dyn SceneAccessor,
    ctx: &ValidatorContext,
    entry: &DiagnosticEntry,
) -> Result<RemediationOutcome, SceneError> {
    let Some(placeholder) = ctx.options.placeholder_image.as_deref() else {
        return Ok(RemediationOutcome::Surfaced(entry.message.clone()));
    };
    if !placeholder.is_file() {
        return Ok(RemediationOutcome::Surfaced(format!(
            "Placeholder image not found: {}",
            placeholder.display()
        )));
    }

    let project = scene.project().filepath.clone();
    let missing: Vec<OwnerRef> = scene
        .file_blocks()
        .iter()
        .filter(|b| b.kind == DataBlockKind::Image && b.is_file_backed())
        .filter(|b| physical_files(b, &project).iter().any(|f| !f.path.exists()))
        .map(|b| b.owner())
        .collect();

    let value = placeholder.display().to_string();
    for owner in &missing {
        scene.write_property(owner, "filepath", &value)?;
        log::info!("replaced missing file of {} with placeholder", owner);
    }
    Ok(RemediationOutcome::Applied(missing.len()))
}
