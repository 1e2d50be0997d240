//! In-memory scene backed by a JSON snapshot of the host document.
//!
//! Lets the validators and the export pipeline run without the host
//! application: the CLI loads a snapshot file, tests build one inline.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::resolve_host_path;
use crate::scene::{
    AnimatedBlock, BatchScene, CompositorNode, FileBlock, ModifierKind, OwnerRef, PointCache,
    ProjectInfo, RenderSettings, SceneAccessor, SceneError, SceneObject, VolumeBlock,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub project: ProjectInfo,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub file_blocks: Vec<FileBlock>,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub volumes: Vec<VolumeBlock>,
    #[serde(default)]
    pub animated_blocks: Vec<AnimatedBlock>,
    #[serde(default)]
    pub compositor_nodes: Vec<CompositorNode>,
    #[serde(default)]
    pub batch_scenes: Vec<BatchScene>,
}

/// Record of the host operators the pipeline invoked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostCalls {
    pub unpack_all: usize,
    pub make_local_all: usize,
    pub make_paths_absolute: usize,
    pub saved_copies: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MemoryScene {
    snapshot: SceneSnapshot,
    calls: HostCalls,
    fail_saves: bool,
}

impl MemoryScene {
    pub fn new(snapshot: SceneSnapshot) -> Self {
        Self {
            snapshot,
            calls: HostCalls::default(),
            fail_saves: false,
        }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, SceneError> {
        Ok(Self::new(serde_json::from_value(value)?))
    }

    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::new(serde_json::from_str(&content)?))
    }

    /// Makes every later `save_copy` fail, as a full disk would.
    pub fn with_failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    pub fn snapshot(&self) -> &SceneSnapshot {
        &self.snapshot
    }

    pub fn calls(&self) -> &HostCalls {
        &self.calls
    }

    fn object_modifier_mut(
        &mut self,
        object: &str,
        modifier: &str,
    ) -> Result<&mut ModifierKind, SceneError> {
        self.snapshot
            .objects
            .iter_mut()
            .find(|o| o.name == object)
            .and_then(|o| o.modifiers.iter_mut().find(|m| m.name == modifier))
            .map(|m| &mut m.kind)
            .ok_or_else(|| SceneError::UnknownOwner(format!("{}/{}", object, modifier)))
    }

    fn object_modifier(&self, object: &str, modifier: &str) -> Result<&ModifierKind, SceneError> {
        self.snapshot
            .objects
            .iter()
            .find(|o| o.name == object)
            .and_then(|o| o.modifiers.iter().find(|m| m.name == modifier))
            .map(|m| &m.kind)
            .ok_or_else(|| SceneError::UnknownOwner(format!("{}/{}", object, modifier)))
    }
}

fn unknown(owner: &OwnerRef, name: &str) -> SceneError {
    SceneError::UnknownProperty {
        owner: owner.to_string(),
        name: name.to_string(),
    }
}

fn parse<T: std::str::FromStr>(owner: &OwnerRef, name: &str, value: &str) -> Result<T, SceneError> {
    value.parse().map_err(|_| SceneError::InvalidValue {
        owner: owner.to_string(),
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn optional(value: Option<u32>, owner: &OwnerRef, name: &str) -> Result<String, SceneError> {
    value.map(|v| v.to_string()).ok_or_else(|| unknown(owner, name))
}

fn point_caches(kind: &ModifierKind) -> Vec<&PointCache> {
    match kind {
        ModifierKind::Smoke { point_caches, .. }
        | ModifierKind::Fluid { point_caches, .. }
        | ModifierKind::Cloth { point_caches }
        | ModifierKind::ParticleSystem { point_caches, .. } => point_caches.iter().collect(),
        ModifierKind::DynamicPaint { canvas_surfaces: Some(surfaces), .. } => {
            surfaces.iter().flat_map(|s| s.point_caches.iter()).collect()
        }
        _ => vec![],
    }
}

fn point_caches_mut(kind: &mut ModifierKind) -> Vec<&mut PointCache> {
    match kind {
        ModifierKind::Smoke { point_caches, .. }
        | ModifierKind::Fluid { point_caches, .. }
        | ModifierKind::Cloth { point_caches }
        | ModifierKind::ParticleSystem { point_caches, .. } => point_caches.iter_mut().collect(),
        ModifierKind::DynamicPaint { canvas_surfaces: Some(surfaces), .. } => surfaces
            .iter_mut()
            .flat_map(|s| s.point_caches.iter_mut())
            .collect(),
        _ => vec![],
    }
}

fn absolutize(path: &mut String, project_file: &str, library: Option<&str>) {
    if path.starts_with(crate::paths::RELATIVE_PREFIX) {
        *path = resolve_host_path(path, project_file, library)
            .display()
            .to_string();
    }
}

impl SceneAccessor for MemoryScene {
    fn project(&self) -> &ProjectInfo {
        &self.snapshot.project
    }

    fn render(&self) -> &RenderSettings {
        &self.snapshot.render
    }

    fn file_blocks(&self) -> &[FileBlock] {
        &self.snapshot.file_blocks
    }

    fn objects(&self) -> &[SceneObject] {
        &self.snapshot.objects
    }

    fn volumes(&self) -> &[VolumeBlock] {
        &self.snapshot.volumes
    }

    fn animated_blocks(&self) -> &[AnimatedBlock] {
        &self.snapshot.animated_blocks
    }

    fn compositor_nodes(&self) -> &[CompositorNode] {
        &self.snapshot.compositor_nodes
    }

    fn batch_scenes(&self) -> &[BatchScene] {
        &self.snapshot.batch_scenes
    }

    fn read_property(&self, owner: &OwnerRef, name: &str) -> Result<String, SceneError> {
        match owner {
            OwnerRef::Render => {
                let r = &self.snapshot.render;
                match name {
                    "filepath" => Ok(r.filepath.clone()),
                    "threads_mode" => Ok(r.threads_mode.clone()),
                    "quality" => Ok(r.quality.to_string()),
                    "frame_current" => Ok(r.frame_current.to_string()),
                    "use_border" => Ok(r.use_border.to_string()),
                    "samples" => optional(r.samples, owner, name),
                    "tile_size" | "debug_tile_size" => optional(r.tile_size, owner, name),
                    "tile_x" => optional(r.tile_x, owner, name),
                    "tile_y" => optional(r.tile_y, owner, name),
                    _ => Err(unknown(owner, name)),
                }
            }
            OwnerRef::DataBlock { kind, name: block } => self
                .snapshot
                .file_blocks
                .iter()
                .find(|b| b.kind == *kind && b.name == *block)
                .ok_or_else(|| SceneError::UnknownOwner(owner.to_string()))
                .and_then(|b| match name {
                    "filepath" => Ok(b.filepath.clone()),
                    _ => Err(unknown(owner, name)),
                }),
            OwnerRef::Modifier { object, modifier } => {
                match (self.object_modifier(object, modifier)?, name) {
                    (ModifierKind::Ocean { filepath, .. }, "filepath")
                    | (ModifierKind::MeshCache { filepath }, "filepath") => Ok(filepath.clone()),
                    _ => Err(unknown(owner, name)),
                }
            }
            OwnerRef::ModifierSettings { object, modifier } => {
                match (self.object_modifier(object, modifier)?, name) {
                    (ModifierKind::FluidSimulation { filepath, .. }, "filepath") => {
                        Ok(filepath.clone())
                    }
                    _ => Err(unknown(owner, name)),
                }
            }
            OwnerRef::DomainSettings { object, modifier } => {
                match (self.object_modifier(object, modifier)?, name) {
                    (ModifierKind::Fluid { cache_directory, .. }, "cache_directory") => {
                        Ok(cache_directory.clone())
                    }
                    _ => Err(unknown(owner, name)),
                }
            }
            OwnerRef::PointCache { object, modifier, index } => {
                let caches = point_caches(self.object_modifier(object, modifier)?);
                let cache = caches
                    .get(*index)
                    .ok_or_else(|| SceneError::UnknownOwner(owner.to_string()))?;
                match name {
                    "filepath" => Ok(cache.filepath.clone()),
                    "name" => Ok(cache.name.clone()),
                    _ => Err(unknown(owner, name)),
                }
            }
            OwnerRef::Volume { name: volume } => self
                .snapshot
                .volumes
                .iter()
                .find(|v| v.name == *volume)
                .ok_or_else(|| SceneError::UnknownOwner(owner.to_string()))
                .and_then(|v| match name {
                    "filepath" => Ok(v.filepath.clone()),
                    _ => Err(unknown(owner, name)),
                }),
            OwnerRef::CompositorNode { name: node } => self
                .snapshot
                .compositor_nodes
                .iter()
                .find(|n| n.name == *node)
                .ok_or_else(|| SceneError::UnknownOwner(owner.to_string()))
                .and_then(|n| match name {
                    "base_path" => Ok(n.base_path.clone()),
                    _ => Err(unknown(owner, name)),
                }),
        }
    }

    fn write_property(
        &mut self,
        owner: &OwnerRef,
        name: &str,
        value: &str,
    ) -> Result<(), SceneError> {
        match owner {
            OwnerRef::Render => {
                let r = &mut self.snapshot.render;
                match name {
                    "filepath" => r.filepath = value.to_string(),
                    "threads_mode" => r.threads_mode = value.to_string(),
                    "quality" => r.quality = parse(owner, name, value)?,
                    "frame_current" => r.frame_current = parse(owner, name, value)?,
                    "use_border" => r.use_border = parse(owner, name, value)?,
                    "samples" if r.samples.is_some() => {
                        r.samples = Some(parse(owner, name, value)?)
                    }
                    "tile_size" | "debug_tile_size" if r.tile_size.is_some() => {
                        r.tile_size = Some(parse(owner, name, value)?)
                    }
                    "tile_x" if r.tile_x.is_some() => r.tile_x = Some(parse(owner, name, value)?),
                    "tile_y" if r.tile_y.is_some() => r.tile_y = Some(parse(owner, name, value)?),
                    _ => return Err(unknown(owner, name)),
                }
                Ok(())
            }
            OwnerRef::DataBlock { kind, name: block } => {
                let b = self
                    .snapshot
                    .file_blocks
                    .iter_mut()
                    .find(|b| b.kind == *kind && b.name == *block)
                    .ok_or_else(|| SceneError::UnknownOwner(owner.to_string()))?;
                match name {
                    "filepath" => b.filepath = value.to_string(),
                    _ => return Err(unknown(owner, name)),
                }
                Ok(())
            }
            OwnerRef::Modifier { object, modifier } => {
                match (self.object_modifier_mut(object, modifier)?, name) {
                    (ModifierKind::Ocean { filepath, .. }, "filepath")
                    | (ModifierKind::MeshCache { filepath }, "filepath") => {
                        *filepath = value.to_string();
                        Ok(())
                    }
                    _ => Err(unknown(owner, name)),
                }
            }
            OwnerRef::ModifierSettings { object, modifier } => {
                match (self.object_modifier_mut(object, modifier)?, name) {
                    (ModifierKind::FluidSimulation { filepath, .. }, "filepath") => {
                        *filepath = value.to_string();
                        Ok(())
                    }
                    _ => Err(unknown(owner, name)),
                }
            }
            OwnerRef::DomainSettings { object, modifier } => {
                match (self.object_modifier_mut(object, modifier)?, name) {
                    (ModifierKind::Fluid { cache_directory, .. }, "cache_directory") => {
                        *cache_directory = value.to_string();
                        Ok(())
                    }
                    _ => Err(unknown(owner, name)),
                }
            }
            OwnerRef::PointCache { object, modifier, index } => {
                let kind = self.object_modifier_mut(object, modifier)?;
                let mut caches = point_caches_mut(kind);
                let cache = caches
                    .get_mut(*index)
                    .ok_or_else(|| SceneError::UnknownOwner(owner.to_string()))?;
                match name {
                    "filepath" => cache.filepath = value.to_string(),
                    "name" => cache.name = value.to_string(),
                    _ => return Err(unknown(owner, name)),
                }
                Ok(())
            }
            OwnerRef::Volume { name: volume } => {
                let v = self
                    .snapshot
                    .volumes
                    .iter_mut()
                    .find(|v| v.name == *volume)
                    .ok_or_else(|| SceneError::UnknownOwner(owner.to_string()))?;
                match name {
                    "filepath" => v.filepath = value.to_string(),
                    _ => return Err(unknown(owner, name)),
                }
                Ok(())
            }
            OwnerRef::CompositorNode { name: node } => {
                let n = self
                    .snapshot
                    .compositor_nodes
                    .iter_mut()
                    .find(|n| n.name == *node)
                    .ok_or_else(|| SceneError::UnknownOwner(owner.to_string()))?;
                match name {
                    "base_path" => n.base_path = value.to_string(),
                    _ => return Err(unknown(owner, name)),
                }
                Ok(())
            }
        }
    }

    fn unpack_all(&mut self) -> Result<(), SceneError> {
        self.calls.unpack_all += 1;
        for block in &mut self.snapshot.file_blocks {
            block.packed = false;
        }
        Ok(())
    }

    fn make_local_all(&mut self) -> Result<(), SceneError> {
        self.calls.make_local_all += 1;
        let project = self.snapshot.project.filepath.clone();
        for block in &mut self.snapshot.file_blocks {
            if let Some(library) = block.library.take() {
                absolutize(&mut block.filepath, &project, Some(&library));
            }
        }
        Ok(())
    }

    fn make_paths_absolute(&mut self) -> Result<(), SceneError> {
        self.calls.make_paths_absolute += 1;
        let project = self.snapshot.project.filepath.clone();
        if project.is_empty() {
            return Err(SceneError::Host(
                "cannot resolve relative paths of an unsaved project".to_string(),
            ));
        }

        absolutize(&mut self.snapshot.render.filepath, &project, None);
        for block in &mut self.snapshot.file_blocks {
            let library = block.library.clone();
            absolutize(&mut block.filepath, &project, library.as_deref());
        }
        for volume in &mut self.snapshot.volumes {
            absolutize(&mut volume.filepath, &project, None);
        }
        for node in &mut self.snapshot.compositor_nodes {
            absolutize(&mut node.base_path, &project, None);
        }
        for object in &mut self.snapshot.objects {
            for modifier in &mut object.modifiers {
                match &mut modifier.kind {
                    ModifierKind::Ocean { filepath, .. }
                    | ModifierKind::MeshCache { filepath }
                    | ModifierKind::FluidSimulation { filepath, .. } => {
                        absolutize(filepath, &project, None)
                    }
                    ModifierKind::Fluid { cache_directory, .. } => {
                        absolutize(cache_directory, &project, None)
                    }
                    _ => {}
                }
                for cache in point_caches_mut(&mut modifier.kind) {
                    absolutize(&mut cache.filepath, &project, None);
                }
            }
        }
        Ok(())
    }

    fn save_copy(&mut self, path: &Path) -> Result<(), SceneError> {
        if self.fail_saves {
            return Err(SceneError::Host(format!("could not save {}", path.display())));
        }
        let content = serde_json::to_vec_pretty(&self.snapshot)?;
        fs::write(path, content)?;
        self.calls.saved_copies.push(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::PropertyHandle;
    use serde_json::json;

    fn scene() -> MemoryScene {
        MemoryScene::from_value(json!({
            "project": {"filepath": "/p/shot.blend", "scene_name": "Scene", "host_version": "3.6.0"},
            "render": {"filepath": "//render/frame_", "tile_size": 2048},
            "file_blocks": [
                {"kind": "image", "name": "wood", "filepath": "//tex/wood.png"},
                {"kind": "image", "name": "linked", "filepath": "//metal.png", "library": "/lib/props.blend"}
            ],
            "objects": [{
                "name": "Canvas",
                "modifiers": [{
                    "name": "DynamicPaint",
                    "type": "dynamic_paint",
                    "is_canvas": true,
                    "canvas_surfaces": [
                        {"name": "Wet", "point_caches": [{"name": "a", "filepath": "//c/a"}]},
                        {"name": "Dry", "point_caches": [{"name": "b", "filepath": "//c/b"}]}
                    ]
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_point_cache_index_spans_surfaces() {
        let mut scene = scene();
        let handle = PropertyHandle::filepath(OwnerRef::PointCache {
            object: "Canvas".into(),
            modifier: "DynamicPaint".into(),
            index: 1,
        });
        assert_eq!(handle.get(&scene).unwrap(), "//c/b");
        handle.set(&mut scene, "X:\\alice\\tex").unwrap();
        assert_eq!(handle.get(&scene).unwrap(), "X:\\alice\\tex");
    }

    #[test]
    fn test_make_local_then_absolute() {
        let mut scene = scene();
        scene.make_local_all().unwrap();
        scene.make_paths_absolute().unwrap();
        let blocks = scene.file_blocks();
        assert_eq!(blocks[0].filepath, "/p/tex/wood.png");
        assert_eq!(blocks[1].filepath, "/lib/metal.png");
        assert!(blocks[1].library.is_none());
        assert_eq!(scene.render().filepath, "/p/render/frame_");
    }

    #[test]
    fn test_unknown_property_is_an_error() {
        let scene = scene();
        let err = scene.read_property(&OwnerRef::Render, "does_not_exist").unwrap_err();
        assert!(matches!(err, SceneError::UnknownProperty { .. }));
    }

    #[test]
    fn test_optional_render_property() {
        let mut scene = scene();
        scene.write_property(&OwnerRef::Render, "tile_size", "32").unwrap();
        assert_eq!(scene.render().tile_size, Some(32));
        assert!(scene.write_property(&OwnerRef::Render, "tile_x", "16").is_err());
    }
}
