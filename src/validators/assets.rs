//! Texture And Cache Collection
//!
//! Checks every file-backed data block and every cache reference, and on
//! export stages them into the asset manifest while pointing the scene at
//! the farm-side copies.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ledger::MutationLedger;
use crate::manifest::AssetManifest;
use crate::paths::{
    extension_lower, file_name, is_valid_filename, resolve_host_path, sequence_siblings,
    server_tex_path, udim_tile_path,
};
use crate::pipeline::PipelineError;
use crate::results::{RemediationType, ResultWriter};
use crate::scene::{DataBlockKind, FileBlock, FileSource, PropertyHandle, SceneAccessor, SceneError};
use super::caches::{self, discover_cache_references};
use super::{ExportContext, Validator, ValidatorContext};

const SCRIPT_EXTENSION: &str = "py";
const UNSUPPORTED_LAYERED_EXTENSION: &str = "psd";

/// Data block kinds in the order they are checked.
const CHECKED_KINDS: &[DataBlockKind] = &[
    DataBlockKind::Image,
    DataBlockKind::MovieClip,
    DataBlockKind::Font,
    DataBlockKind::Sound,
];

/// Data block kinds in the order they are staged. Alembic caches are only
/// carried along, never checked.
const STAGED_KINDS: &[DataBlockKind] = &[
    DataBlockKind::Image,
    DataBlockKind::MovieClip,
    DataBlockKind::Font,
    DataBlockKind::Sound,
    DataBlockKind::CacheFile,
];

/// One file on disk behind a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalFile {
    /// Path as shown to the user.
    pub display: String,
    pub path: PathBuf,
}

/// Expands a data block into the files it needs on disk.
///
/// UDIM images yield one entry per declared tile and nothing for the
/// templated base path. Sequences yield every sibling frame, or the base
/// frame alone when no sibling exists.
pub fn physical_files(block: &FileBlock, project: &str) -> Vec<PhysicalFile> {
    let library = block.library.as_deref();
    match block.source {
        FileSource::Tiled => block
            .tiles
            .iter()
            .map(|tile| {
                let path = resolve_host_path(&udim_tile_path(&block.filepath, *tile), project, library);
                PhysicalFile { display: path.display().to_string(), path }
            })
            .collect(),
        FileSource::Sequence => {
            let base = resolve_host_path(&block.filepath, project, library);
            let siblings = sequence_siblings(&base);
            if siblings.is_empty() {
                vec![PhysicalFile { display: block.filepath.clone(), path: base }]
            } else {
                siblings
                    .into_iter()
                    .map(|path| PhysicalFile { display: path.display().to_string(), path })
                    .collect()
            }
        }
        _ => vec![PhysicalFile {
            display: block.filepath.clone(),
            path: resolve_host_path(&block.filepath, project, library),
        }],
    }
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

#[derive(Debug, Default)]
pub struct TextureAndCacheValidator {
    ledger: MutationLedger,
}

impl TextureAndCacheValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_file(
        &self,
        block: &FileBlock,
        file: &PhysicalFile,
        ctx: &ValidatorContext,
        results: &mut ResultWriter<'_>,
    ) {
        let ext = extension_lower(&file.path);
        let name = file_name(&file.path.display().to_string());

        if ext == SCRIPT_EXTENSION {
            return;
        } else if !file.path.exists() {
            results.error_with(
                format!("File not found: {} (texture: {} )", file.display, block.name),
                RemediationType::ReplaceMissingImage,
                &block.name,
                "",
            );
        } else if !file.path.is_file() {
            results.error(format!(
                "Invalid file name for texture: {} (file name: {} )",
                block.name, file.display
            ));
        } else if !is_valid_filename(&name) {
            results.error(format!("Filename has unsupported characters: {}", file.display));
        } else if let Some(staged_size) = file_size(&ctx.staged_path(&name)) {
            if Some(staged_size) != file_size(&file.path) {
                results.error(format!(
                    "Texture \"{}\" {} exported and used by other project. Please rename this texture. (texture: {} )",
                    name,
                    file.path.display(),
                    block.name
                ));
            }
        } else if let Some(foreign_size) = ctx.foreign_manifest.size_of(&name) {
            if Some(foreign_size) != file_size(&file.path) {
                results.error(format!(
                    "Texture \"{}\" exported and used by other project. Please rename this texture",
                    name
                ));
            }
        }

        if ext == UNSUPPORTED_LAYERED_EXTENSION {
            results.error(format!("Filetype (psd) not supported: {}", file.display));
        }
    }

    /// Stages one file as `tex/<name>` and rewrites the block's path.
    fn stage_block_file(
        &mut self,
        scene: &mut dyn SceneAccessor,
        block: &FileBlock,
        path: &Path,
        server: &str,
        assets: &mut AssetManifest,
    ) -> Result<(), SceneError> {
        if !path.is_file() {
            return Ok(());
        }
        let name = file_name(&path.display().to_string());
        assets.stage_file(format!("tex/{}", name), path);
        self.ledger.apply(
            scene,
            PropertyHandle::filepath(block.owner()),
            &format!("{}\\{}", server, name),
        )
    }

    fn stage_regular_assets(
        &mut self,
        scene: &mut dyn SceneAccessor,
        server: &str,
        assets: &mut AssetManifest,
    ) -> Result<(), SceneError> {
        let project = scene.project().filepath.clone();
        let all = scene.file_blocks();
        let blocks: Vec<FileBlock> = STAGED_KINDS
            .iter()
            .flat_map(|kind| all.iter().filter(move |b| b.kind == *kind))
            .filter(|b| b.is_file_backed())
            .cloned()
            .collect();

        for block in &blocks {
            match block.source {
                FileSource::Tiled => {
                    let mut staged_any = false;
                    for tile in physical_files(block, &project) {
                        if tile.path.is_file() {
                            let name = file_name(&tile.display);
                            staged_any |= assets.stage_file(format!("tex/{}", name), &tile.path);
                        }
                    }
                    if staged_any {
                        self.ledger.apply(
                            scene,
                            PropertyHandle::filepath(block.owner()),
                            &format!("{}\\{}", server, file_name(&block.filepath)),
                        )?;
                    }
                }
                FileSource::Sequence => {
                    let base = resolve_host_path(&block.filepath, &project, block.library.as_deref());
                    self.stage_block_file(scene, block, &base, server, assets)?;
                    for frame in sequence_siblings(&base) {
                        let name = file_name(&frame.display().to_string());
                        assets.stage_file(format!("tex/{}", name), &frame);
                    }
                }
                _ => {
                    let path = resolve_host_path(&block.filepath, &project, block.library.as_deref());
                    self.stage_block_file(scene, block, &path, server, assets)?;
                }
            }
        }
        Ok(())
    }
}

impl Validator for TextureAndCacheValidator {
    fn name(&self) -> &'static str { "Texture" }

    fn test(&self, scene: &dyn SceneAccessor, ctx: &ValidatorContext, results: &mut ResultWriter<'_>) {
        if ctx.settings.manager_running_marker().exists() {
            results.info("Farm manager is running");
        }

        let project = scene.project().filepath.as_str();
        for kind in CHECKED_KINDS {
            for block in scene.file_blocks().iter().filter(|b| b.kind == *kind) {
                if !block.is_file_backed() {
                    continue;
                }
                for file in physical_files(block, project) {
                    self.check_file(block, &file, ctx, results);
                }
            }
        }

        for reference in discover_cache_references(scene, &ctx.capabilities) {
            caches::classify(&reference, project, results);
        }
    }

    fn prepare_save(
        &mut self,
        scene: &mut dyn SceneAccessor,
        export: &mut ExportContext<'_>,
    ) -> Result<(), PipelineError> {
        fs::create_dir_all(export.export_folder.join("tex"))?;
        let server = server_tex_path(export.validator.user());

        let references = discover_cache_references(&*scene, &export.validator.capabilities);
        for (index, reference) in references.iter().enumerate() {
            caches::stage(scene, reference, index, &server, export.assets, &mut self.ledger)?;
        }

        self.stage_regular_assets(scene, &server, export.assets)?;
        log::info!("staged {} assets", export.assets.len());
        Ok(())
    }

    fn post_save(&mut self, scene: &mut dyn SceneAccessor) -> Result<(), SceneError> {
        self.ledger.restore_all(scene).map(|_| ())
    }

    fn pending_restores(&self) -> usize {
        self.ledger.len()
    }

    fn skipped_by_fast_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientSettings, ForeignManifest, JobOptions};
    use crate::descriptor::JobDescriptor;
    use crate::memory::MemoryScene;
    use crate::results::{ResultLog, Severity};
    use crate::scene::HostCapabilities;
    use serde_json::{json, Value};

    fn context(default_path: &Path, foreign: &str) -> ValidatorContext {
        ValidatorContext {
            settings: ClientSettings {
                user_name: "alice".into(),
                default_path: default_path.to_path_buf(),
                ..Default::default()
            },
            options: JobOptions::default(),
            capabilities: HostCapabilities::for_version(&semver::Version::new(3, 6, 0)),
            foreign_manifest: ForeignManifest::parse(foreign),
        }
    }

    fn scene(project: &Path, blocks: Value) -> MemoryScene {
        MemoryScene::from_value(json!({
            "project": {"filepath": project, "scene_name": "Scene", "host_version": "3.6.0"},
            "file_blocks": blocks
        }))
        .unwrap()
    }

    #[test]
    fn test_psd_and_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("paint.psd"), b"psd").unwrap();
        fs::write(dir.path().join("tex:01.png"), b"png").unwrap();
        let scene = scene(
            &dir.path().join("shot.blend"),
            json!([
                {"kind": "image", "name": "paint", "filepath": "//paint.psd"},
                {"kind": "image", "name": "bad", "filepath": "//tex:01.png"}
            ]),
        );

        let mut log = ResultLog::new();
        TextureAndCacheValidator::new().test(&scene, &context(dir.path(), ""), &mut log.writer(Some("Texture")));

        let messages: Vec<&str> = log.errors().map(|e| e.message.as_str()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("Filetype (psd) not supported"));
        assert!(messages[1].starts_with("Filename has unsupported characters"));
    }

    #[test]
    fn test_foreign_manifest_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("wood.png"), b"1234").unwrap();
        let scene = scene(
            &dir.path().join("shot.blend"),
            json!([{"kind": "image", "name": "wood", "filepath": "//wood.png"}]),
        );

        let mut log = ResultLog::new();
        let validator = TextureAndCacheValidator::new();
        validator.test(&scene, &context(dir.path(), "WOOD.png:4\n"), &mut log.writer(None));
        assert_eq!(log.count(Severity::Error), 0);

        let mut log = ResultLog::new();
        validator.test(&scene, &context(dir.path(), "wood.png:99\n"), &mut log.writer(None));
        assert_eq!(log.count(Severity::Error), 1);
    }

    #[test]
    fn test_staging_collision() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("wood.png"), b"1234").unwrap();
        let staged = dir.path().join("alice").join("tex");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("wood.png"), b"12").unwrap();
        let scene = scene(
            &dir.path().join("shot.blend"),
            json!([{"kind": "image", "name": "wood", "filepath": "//wood.png"}]),
        );

        let mut log = ResultLog::new();
        TextureAndCacheValidator::new().test(&scene, &context(dir.path(), ""), &mut log.writer(None));
        assert_eq!(log.count(Severity::Error), 1);
        assert!(log.entries()[0].message.contains("Please rename this texture"));
    }

    #[test]
    fn test_generated_and_builtin_blocks_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene(
            &dir.path().join("shot.blend"),
            json!([
                {"kind": "image", "name": "Render Result", "filepath": "", "source": "VIEWER"},
                {"kind": "font", "name": "Bfont", "filepath": "<builtin>"}
            ]),
        );

        let mut log = ResultLog::new();
        TextureAndCacheValidator::new().test(&scene, &context(dir.path(), ""), &mut log.writer(None));
        assert!(log.is_empty());
    }

    #[test]
    fn test_sequence_frames_are_staged() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        fs::create_dir(&frames).unwrap();
        for i in 1..=3 {
            fs::write(frames.join(format!("smoke_{:04}.png", i)), b"f").unwrap();
        }
        let mut scene = scene(
            &dir.path().join("shot.blend"),
            json!([{"kind": "image", "name": "smoke", "filepath": "//frames/smoke_0001.png", "source": "SEQUENCE"}]),
        );
        let ctx = context(dir.path(), "");
        let export_folder = dir.path().join("alice");
        let mut assets = AssetManifest::new();
        let mut descriptor = JobDescriptor::new();
        let mut validator = TextureAndCacheValidator::new();
        {
            let mut export = ExportContext {
                validator: &ctx,
                export_folder: &export_folder,
                assets: &mut assets,
                descriptor: &mut descriptor,
            };
            validator.prepare_save(&mut scene, &mut export).unwrap();
        }

        assert_eq!(assets.len(), 3);
        assert_eq!(scene.file_blocks()[0].filepath, "X:\\alice\\tex\\smoke_0001.png");
        assert_eq!(validator.pending_restores(), 1);

        validator.post_save(&mut scene).unwrap();
        assert_eq!(scene.file_blocks()[0].filepath, "//frames/smoke_0001.png");
        assert_eq!(validator.pending_restores(), 0);
    }
}
