//! Scene Access - Narrow Capability Over The Host Document
//!
//! Validators never touch the host directly. Reads go through typed records,
//! writes go through string properties addressed by [`PropertyHandle`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Unknown owner: {0}")]
    UnknownOwner(String),

    #[error("Unknown property {name} on {owner}")]
    UnknownProperty { owner: String, name: String },

    #[error("Invalid value {value:?} for {owner}.{name}")]
    InvalidValue {
        owner: String,
        name: String,
        value: String,
    },

    #[error("Host operation failed: {0}")]
    Host(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Feature switches derived from the host version once, at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// Fluid domains still expose their own point cache (hosts up to 2.90).
    pub fluid_domain_point_cache: bool,
    /// Cycles tile size lives in `debug_tile_size` (hosts before 3.0).
    pub cycles_debug_tile_size: bool,
}

impl HostCapabilities {
    pub fn for_version(version: &semver::Version) -> Self {
        let fluid_cutoff = semver::Version::new(2, 90, 0);
        let tile_cutoff = semver::Version::new(3, 0, 0);
        Self {
            fluid_domain_point_cache: *version <= fluid_cutoff,
            cycles_debug_tile_size: *version < tile_cutoff,
        }
    }

    pub fn cycles_tile_attribute(&self) -> &'static str {
        if self.cycles_debug_tile_size {
            "debug_tile_size"
        } else {
            "tile_size"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Saved project file; empty when the project was never saved.
    #[serde(default)]
    pub filepath: String,
    pub scene_name: String,
    pub host_version: semver::Version,
    /// Renderer property groups attached to the scene (e.g. `vray`).
    #[serde(default)]
    pub scene_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewLayer {
    pub name: String,
    #[serde(default = "default_true")]
    pub use_for_render: bool,
}

fn default_true() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub engine: String,
    pub camera: Option<String>,
    pub view_layers: Vec<ViewLayer>,
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub resolution_percentage: u32,
    pub frame_start: i32,
    pub frame_end: i32,
    pub frame_step: i32,
    pub frame_current: i32,
    pub use_border: bool,
    pub use_crop_to_border: bool,
    pub use_stamp: bool,
    pub use_compositing: bool,
    pub use_freestyle: bool,
    pub filepath: String,
    pub file_format: String,
    pub color_mode: String,
    pub tiff_codec: Option<String>,
    pub threads_mode: String,
    pub quality: u32,
    /// Render device of the active engine (`CPU`, `GPU`, `OCL`, ...).
    pub device: Option<String>,
    pub samples: Option<u32>,
    pub tile_size: Option<u32>,
    pub tile_x: Option<u32>,
    pub tile_y: Option<u32>,
    /// Version of third-party renderers that carry one (Octane, LuxCore).
    pub renderer_version: Option<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            engine: "CYCLES".to_string(),
            camera: None,
            view_layers: vec![],
            resolution_x: 1920,
            resolution_y: 1080,
            resolution_percentage: 100,
            frame_start: 1,
            frame_end: 250,
            frame_step: 1,
            frame_current: 1,
            use_border: false,
            use_crop_to_border: false,
            use_stamp: false,
            use_compositing: false,
            use_freestyle: false,
            filepath: String::new(),
            file_format: "PNG".to_string(),
            color_mode: "RGBA".to_string(),
            tiff_codec: None,
            threads_mode: "AUTO".to_string(),
            quality: 90,
            device: None,
            samples: None,
            tile_size: None,
            tile_x: None,
            tile_y: None,
            renderer_version: None,
        }
    }
}

impl RenderSettings {
    pub fn is_gpu_render(&self) -> bool {
        let device = self.device.as_deref().unwrap_or("");
        match self.engine.as_str() {
            "CYCLES" => device == "GPU",
            "LUXCORE" => device == "OCL",
            "octane" | "BLENDER_EEVEE" => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataBlockKind {
    Image,
    MovieClip,
    Font,
    Sound,
    CacheFile,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileSource {
    #[default]
    File,
    Tiled,
    Sequence,
    Movie,
    Generated,
    Viewer,
}

/// Sentinel path the host uses for embedded fonts.
pub const BUILTIN_PATH: &str = "<builtin>";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBlock {
    pub kind: DataBlockKind,
    pub name: String,
    #[serde(default)]
    pub filepath: String,
    /// Library file the block was linked from, if any.
    #[serde(default)]
    pub library: Option<String>,
    #[serde(default)]
    pub source: FileSource,
    /// Declared UDIM tile numbers for tiled images.
    #[serde(default)]
    pub tiles: Vec<u32>,
    #[serde(default)]
    pub packed: bool,
}

impl FileBlock {
    pub fn owner(&self) -> OwnerRef {
        OwnerRef::DataBlock {
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    /// Whether the block refers to something on disk at all.
    pub fn is_file_backed(&self) -> bool {
        if self.filepath.is_empty() || self.filepath == BUILTIN_PATH {
            return false;
        }
        matches!(
            self.source,
            FileSource::File | FileSource::Tiled | FileSource::Sequence | FileSource::Movie
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PointCache {
    pub name: String,
    pub filepath: String,
    pub is_baked: bool,
    pub use_external: bool,
    pub use_disk_cache: bool,
    pub is_outdated: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FluidType {
    None,
    Domain,
    Flow,
    Effector,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticleType {
    Emitter,
    Hair,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhysicsType {
    No,
    Newton,
    Keyed,
    Boids,
    Fluid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyFluidType {
    None,
    Domain,
    Fluid,
    Obstacle,
    Inflow,
    Outflow,
    Particle,
    Control,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasSurface {
    pub name: String,
    #[serde(default)]
    pub point_caches: Vec<PointCache>,
}

/// Closed set of modifier kinds the asset scan distinguishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModifierKind {
    Smoke {
        is_domain: bool,
        #[serde(default)]
        point_caches: Vec<PointCache>,
    },
    Fluid {
        fluid_type: FluidType,
        #[serde(default)]
        has_cache_baked_mesh: bool,
        #[serde(default)]
        cache_directory: String,
        #[serde(default)]
        point_caches: Vec<PointCache>,
    },
    Cloth {
        #[serde(default)]
        point_caches: Vec<PointCache>,
    },
    ParticleSystem {
        settings_type: ParticleType,
        /// Absent on hosts that do not expose the physics type.
        #[serde(default)]
        physics_type: Option<PhysicsType>,
        #[serde(default)]
        use_hair_dynamics: bool,
        #[serde(default)]
        point_caches: Vec<PointCache>,
    },
    DynamicPaint {
        is_canvas: bool,
        /// `None` when the canvas settings are missing.
        #[serde(default)]
        canvas_surfaces: Option<Vec<CanvasSurface>>,
    },
    Ocean {
        #[serde(default)]
        is_cached: bool,
        #[serde(default)]
        filepath: String,
    },
    FluidSimulation {
        settings_type: LegacyFluidType,
        #[serde(default)]
        filepath: String,
    },
    MeshCache {
        #[serde(default)]
        filepath: String,
    },
    Other {
        #[serde(default)]
        type_name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modifier {
    pub name: String,
    #[serde(flatten)]
    pub kind: ModifierKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeBlock {
    pub name: String,
    #[serde(default)]
    pub filepath: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnimatedKind {
    Object,
    Texture,
    Material,
    Particle,
    World,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverType {
    Average,
    Sum,
    Scripted,
    Min,
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub driver_type: DriverType,
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub data_path: String,
}

/// A data block carrying animation drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimatedBlock {
    pub kind: AnimatedKind,
    pub name: String,
    #[serde(default)]
    pub drivers: Vec<Driver>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositorNode {
    pub name: String,
    pub node_type: String,
    #[serde(default)]
    pub base_path: String,
}

/// Another scene flagged for batch upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScene {
    pub name: String,
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub frame_start: i32,
    pub frame_end: i32,
    #[serde(default)]
    pub filepath: String,
    #[serde(default)]
    pub file_format: String,
    #[serde(default)]
    pub camera: Option<String>,
}

/// Addressable owner of a writable scene property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "owner", rename_all = "snake_case")]
pub enum OwnerRef {
    Render,
    DataBlock { kind: DataBlockKind, name: String },
    Modifier { object: String, modifier: String },
    /// Settings block of a legacy fluid simulation modifier.
    ModifierSettings { object: String, modifier: String },
    /// Domain settings of a modern fluid modifier.
    DomainSettings { object: String, modifier: String },
    /// Point cache `index`, counted across every cache the modifier owns.
    PointCache { object: String, modifier: String, index: usize },
    Volume { name: String },
    CompositorNode { name: String },
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerRef::Render => write!(f, "render"),
            OwnerRef::DataBlock { kind, name } => write!(f, "{:?}({})", kind, name),
            OwnerRef::Modifier { object, modifier } => write!(f, "{}/{}", object, modifier),
            OwnerRef::ModifierSettings { object, modifier } => {
                write!(f, "{}/{}/settings", object, modifier)
            }
            OwnerRef::DomainSettings { object, modifier } => {
                write!(f, "{}/{}/domain_settings", object, modifier)
            }
            OwnerRef::PointCache { object, modifier, index } => {
                write!(f, "{}/{}/point_cache[{}]", object, modifier, index)
            }
            OwnerRef::Volume { name } => write!(f, "Volume({})", name),
            OwnerRef::CompositorNode { name } => write!(f, "Node({})", name),
        }
    }
}

/// Uniform get/set address of one string property.
///
/// Most path-like properties are called `filepath`; a few owners keep the
/// same concept under another attribute name. Both resolve the same way so
/// the mutation ledger never needs to know which one it holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyHandle {
    Direct { owner: OwnerRef, name: &'static str },
    Aliased { owner: OwnerRef, alias: &'static str },
}

impl PropertyHandle {
    pub fn direct(owner: OwnerRef, name: &'static str) -> Self {
        PropertyHandle::Direct { owner, name }
    }

    pub fn filepath(owner: OwnerRef) -> Self {
        PropertyHandle::Direct { owner, name: "filepath" }
    }

    pub fn cache_directory(owner: OwnerRef) -> Self {
        PropertyHandle::Aliased { owner, alias: "cache_directory" }
    }

    pub fn owner(&self) -> &OwnerRef {
        match self {
            PropertyHandle::Direct { owner, .. } | PropertyHandle::Aliased { owner, .. } => owner,
        }
    }

    pub fn attribute(&self) -> &'static str {
        match self {
            PropertyHandle::Direct { name, .. } => name,
            PropertyHandle::Aliased { alias, .. } => alias,
        }
    }

    pub fn get(&self, scene: &dyn SceneAccessor) -> Result<String, SceneError> {
        scene.read_property(self.owner(), self.attribute())
    }

    pub fn set(&self, scene: &mut dyn SceneAccessor, value: &str) -> Result<(), SceneError> {
        scene.write_property(self.owner(), self.attribute(), value)
    }
}

impl fmt::Display for PropertyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner(), self.attribute())
    }
}

/// Everything the export core needs from the host application.
pub trait SceneAccessor {
    fn project(&self) -> &ProjectInfo;
    fn render(&self) -> &RenderSettings;
    fn file_blocks(&self) -> &[FileBlock];
    fn objects(&self) -> &[SceneObject];
    fn volumes(&self) -> &[VolumeBlock];
    fn animated_blocks(&self) -> &[AnimatedBlock];
    fn compositor_nodes(&self) -> &[CompositorNode];
    fn batch_scenes(&self) -> &[BatchScene];

    fn read_property(&self, owner: &OwnerRef, name: &str) -> Result<String, SceneError>;
    fn write_property(&mut self, owner: &OwnerRef, name: &str, value: &str)
        -> Result<(), SceneError>;

    /// Host operator: unpack every packed data block to disk.
    fn unpack_all(&mut self) -> Result<(), SceneError>;
    /// Host operator: make every library-linked data block local.
    fn make_local_all(&mut self) -> Result<(), SceneError>;
    /// Host operator: rewrite every `//`-relative path as absolute.
    fn make_paths_absolute(&mut self) -> Result<(), SceneError>;
    /// Host operator: save a copy of the project without switching to it.
    fn save_copy(&mut self, path: &Path) -> Result<(), SceneError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_by_version() {
        let old = HostCapabilities::for_version(&semver::Version::new(2, 83, 0));
        assert!(old.fluid_domain_point_cache);
        assert_eq!(old.cycles_tile_attribute(), "debug_tile_size");

        let new = HostCapabilities::for_version(&semver::Version::new(3, 6, 2));
        assert!(!new.fluid_domain_point_cache);
        assert_eq!(new.cycles_tile_attribute(), "tile_size");
    }

    #[test]
    fn test_gpu_detection() {
        let mut render = RenderSettings::default();
        render.device = Some("GPU".into());
        assert!(render.is_gpu_render());

        render.engine = "LUXCORE".into();
        assert!(!render.is_gpu_render());
        render.device = Some("OCL".into());
        assert!(render.is_gpu_render());

        render.engine = "octane".into();
        render.device = None;
        assert!(render.is_gpu_render());
    }

    #[test]
    fn test_builtin_font_is_not_file_backed() {
        let font = FileBlock {
            kind: DataBlockKind::Font,
            name: "Bfont".into(),
            filepath: BUILTIN_PATH.into(),
            library: None,
            source: FileSource::File,
            tiles: vec![],
            packed: false,
        };
        assert!(!font.is_file_backed());
    }

    #[test]
    fn test_modifier_snapshot_shape() {
        let json = serde_json::json!({
            "name": "Ocean",
            "type": "ocean",
            "is_cached": true,
            "filepath": "//ocean_cache"
        });
        let modifier: Modifier = serde_json::from_value(json).unwrap();
        assert!(matches!(modifier.kind, ModifierKind::Ocean { is_cached: true, .. }));
    }
}
