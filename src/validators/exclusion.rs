use crate::pipeline::PipelineError;
use crate::results::ResultWriter;
use crate::scene::{SceneAccessor, SceneError};
use super::{ExportContext, Validator, ValidatorContext};

const EXCLUDED_EXTENSION: &str = "vray";
const EXCLUDED_ENGINES: &[&str] = &["VRAY_RENDER", "VRAY_RENDER_PREVIEW"];

/// Rejects V-Ray scenes outright.
#[derive(Debug, Default)]
pub struct RendererExclusionValidator;

impl RendererExclusionValidator {
    fn has_work(scene: &dyn SceneAccessor) -> bool {
        scene
            .project()
            .scene_extensions
            .iter()
            .any(|e| e == EXCLUDED_EXTENSION)
            && EXCLUDED_ENGINES.contains(&scene.render().engine.as_str())
    }
}

impl Validator for RendererExclusionValidator {
    fn name(&self) -> &'static str { "Vray" }

    fn test(&self, scene: &dyn SceneAccessor, _ctx: &ValidatorContext, results: &mut ResultWriter<'_>) {
        if Self::has_work(scene) {
            results.error("V-Ray is currently not supported.");
        }
    }

    fn prepare_save(
        &mut self,
        _scene: &mut dyn SceneAccessor,
        _export: &mut ExportContext<'_>,
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    fn post_save(&mut self, _scene: &mut dyn SceneAccessor) -> Result<(), SceneError> {
        Ok(())
    }

    fn pending_restores(&self) -> usize { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryScene;
    use serde_json::json;

    fn scene(engine: &str, extensions: &[&str]) -> MemoryScene {
        MemoryScene::from_value(json!({
            "project": {
                "filepath": "/p/shot.blend",
                "scene_name": "Scene",
                "host_version": "3.6.0",
                "scene_extensions": extensions
            },
            "render": {"engine": engine}
        }))
        .unwrap()
    }

    #[test]
    fn test_only_vray_engine_with_settings_is_rejected() {
        assert!(RendererExclusionValidator::has_work(&scene("VRAY_RENDER", &["vray"])));
        assert!(!RendererExclusionValidator::has_work(&scene("CYCLES", &["vray"])));
        assert!(!RendererExclusionValidator::has_work(&scene("VRAY_RENDER", &[])));
    }
}
