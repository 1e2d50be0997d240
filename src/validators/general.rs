use std::path::Path;

use crate::pipeline::PipelineError;
use crate::results::{RemediationType, ResultWriter};
use crate::scene::{SceneAccessor, SceneError};
use super::{ExportContext, Validator, ValidatorContext};

/// Installation sanity and project-saved check.
#[derive(Debug, Default)]
pub struct GeneralValidator;

impl Validator for GeneralValidator {
    fn name(&self) -> &'static str { "General" }

    fn test(&self, scene: &dyn SceneAccessor, ctx: &ValidatorContext, results: &mut ResultWriter<'_>) {
        if ctx.settings.install_failure_marker().exists() {
            results.error(
                "Farminizer was not installed correctly, please close the host application and call \"Reinstall Plugins\" from the farm manager!",
            );
        }

        let project = &scene.project().filepath;
        if project.is_empty() || !Path::new(project).exists() {
            results.error_with(
                "Please save the project before exporting to the farm manager!",
                RemediationType::SaveProject,
                "",
                "",
            );
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
    use crate::config::{ClientSettings, ForeignManifest, JobOptions};
    use crate::memory::MemoryScene;
    use crate::results::{ResultLog, Severity};
    use crate::scene::HostCapabilities;
    use serde_json::json;

    fn context(default_path: &Path) -> ValidatorContext {
        ValidatorContext {
            settings: ClientSettings {
                user_name: "alice".into(),
                default_path: default_path.to_path_buf(),
                ..Default::default()
            },
            options: JobOptions::default(),
            capabilities: HostCapabilities::for_version(&semver::Version::new(3, 6, 0)),
            foreign_manifest: ForeignManifest::default(),
        }
    }

    #[test]
    fn test_unsaved_project_requests_save() {
        let dir = tempfile::tempdir().unwrap();
        let scene = MemoryScene::from_value(json!({
            "project": {"filepath": "", "scene_name": "Scene", "host_version": "3.6.0"}
        }))
        .unwrap();

        let mut log = ResultLog::new();
        GeneralValidator.test(&scene, &context(dir.path()), &mut log.writer(Some("General")));

        assert_eq!(log.count(Severity::Error), 1);
        assert_eq!(log.entries()[0].remediation, Some(RemediationType::SaveProject));
    }

    #[test]
    fn test_install_failure_marker() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("shot.blend");
        std::fs::write(&project, b"x").unwrap();
        std::fs::write(dir.path().join("at2_reb_errorinstallplugs.txt"), b"").unwrap();
        let scene = MemoryScene::from_value(json!({
            "project": {"filepath": project, "scene_name": "Scene", "host_version": "3.6.0"}
        }))
        .unwrap();

        let mut log = ResultLog::new();
        GeneralValidator.test(&scene, &context(dir.path()), &mut log.writer(Some("General")));

        assert_eq!(log.count(Severity::Error), 1);
        assert!(log.entries()[0].message.contains("not installed correctly"));
    }
}
