//! Render Settings - Engine, Output And Compositing Rules
//!
//! Besides checking, this validator owns the render-side half of the export:
//! it redirects output paths to the farm, normalises performance settings
//! and fills the `region` section of the job descriptor.

use std::collections::HashSet;
use std::path::Path;

use crate::ledger::MutationLedger;
use crate::paths::{farm_output_path, file_name, local_download_path, resolve_host_path};
use crate::pipeline::PipelineError;
use crate::results::{DiagnosticEntry, RemediationType, ResultWriter};
use crate::scene::{
    AnimatedKind, CompositorNode, DriverType, OwnerRef, PropertyHandle, RenderSettings,
    SceneAccessor, SceneError,
};
use super::{ExportContext, RemediationOutcome, Validator, ValidatorContext};

pub const REGION_SECTION: &str = "region";

const SUPPORTED_ENGINES: &[&str] = &["CYCLES", "BLENDER_EEVEE", "octane", "LUXCORE"];
const VRAY_ENGINES: &[&str] = &["VRAY_RENDER", "VRAY_RENDER_PREVIEW"];

const PICTURE_FORMATS: &[&str] = &[
    "BMP", "DDS", "IRIS", "PNG", "JPEG", "JPEG2000", "TARGA", "TARGA_RAW", "CINEON", "DPX",
    "MULTILAYER", "OPEN_EXR", "OPEN_EXR_MULTILAYER", "HDR", "TIFF",
];
const DISTRIBUTED_FORMATS: &[&str] = &["BMP", "PNG", "TIFF", "OPEN_EXR", "OPEN_EXR_MULTILAYER"];
const SIZE_LIMITED_FORMATS: &[&str] = &["BMP", "PNG", "TIFF"];

/// Compositor nodes that cannot be split across workers.
const DISTRIBUTED_NODE_BLACKLIST: &[&str] = &[
    "BILATERALBLUR", "BLUR", "BOKEHBLUR", "DEFOCUS", "DESPECKLE", "DILATEERODE", "DBLUR",
    "FILTER", "GLARE", "INPAINT", "PIXELATE", "SUNBEAMS", "VECBLUR", "NORMALIZE", "BOXMASK",
    "ELLIPSEMASK", "CORNERPIN", "CROP", "DISPLACE", "FLIP", "LENSDIST", "MAP_UV",
    "MOVIEDISTORTION", "PLANETRACKDEFORM", "ROTATE", "SCALE", "STABILIZE2D", "TRANSFORM",
    "TRANSLATE",
];

const FILE_OUTPUT_NODE: &str = "OUTPUT_FILE";

/// Drivers are inspected on these kinds, in this order.
const DRIVER_KINDS: &[AnimatedKind] = &[
    AnimatedKind::Object,
    AnimatedKind::Texture,
    AnimatedKind::Material,
    AnimatedKind::Particle,
    AnimatedKind::World,
];

const MIN_RESOLUTION: u32 = 300;
const MAX_RESOLUTION: u32 = 1920;
const MAX_DISTRIBUTED_RESOLUTION: u32 = 16000;
const MAX_CYCLES_SAMPLES: u32 = 666;
const BLACKLIST_LISTED_NODES: usize = 4;

const CYCLES_TILE_SIZE: &str = "32";
const CPU_TILE_SIZE: u32 = 16;
const GPU_TILE_SIZE: u32 = 256;

const GPU_COST_NOTICE: &str = "GPU Rendering is much more expensive than CPU.\n We recommend you to run CPU rendering, as you will spare money and still get a fast result";

/// File or folder name a file-output node writes to.
pub fn output_node_target(base_path: &str) -> String {
    let name = file_name(base_path);
    if !name.is_empty() {
        return name;
    }
    let folder = base_path.trim_end_matches(|c| c == '/' || c == '\\');
    file_name(folder)
}

fn file_output_nodes(nodes: &[CompositorNode]) -> impl Iterator<Item = &CompositorNode> {
    nodes.iter().filter(|n| n.node_type == FILE_OUTPUT_NODE)
}

/// Node targets with duplicates disambiguated. The second and later
/// occurrences of a target get `_<n>` appended, `n` counting across all
/// duplicates.
pub fn unique_output_targets(nodes: &[CompositorNode]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut suffix = 0;
    file_output_nodes(nodes)
        .map(|node| {
            let mut target = output_node_target(&node.base_path);
            if !seen.insert(target.clone()) {
                suffix += 1;
                target = format!("{}_{}", target, suffix);
                seen.insert(target.clone());
            }
            (node.name.clone(), target)
        })
        .collect()
}

/// Renderer id reported to the farm: engine, `GPU` suffix, version digits.
pub fn renderer_id(render: &RenderSettings, gpu: bool) -> String {
    let gpu_suffix = if gpu { "GPU" } else { "" };
    let version = render.renderer_version.as_deref().map(|v| v.replace('.', ""));
    match render.engine.as_str() {
        "octane" => format!("Octane{}{}", gpu_suffix, version.unwrap_or_default()),
        "LUXCORE" => match version {
            Some(version) => format!("LUXCORE{}{}", gpu_suffix, version),
            None => "LUXCORE".to_string(),
        },
        "CYCLES" => format!("CYCLES{}", gpu_suffix),
        other => other.to_string(),
    }
}

fn os_label() -> &'static str {
    match std::env::consts::OS {
        "windows" => "Windows",
        "macos" => "Mac",
        _ => "Linux",
    }
}

fn bits_label() -> &'static str {
    if cfg!(target_pointer_width = "64") {
        "64"
    } else {
        "32"
    }
}

#[derive(Debug, Default)]
pub struct RenderSettingsValidator {
    ledger: MutationLedger,
}

impl RenderSettingsValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn test_dimensions(render: &RenderSettings, distributed: bool, results: &mut ResultWriter<'_>) {
        if render.resolution_x < MIN_RESOLUTION {
            results.warn("Dimensions: Resolution X seems to be very low");
        }
        if !distributed && render.resolution_x > MAX_RESOLUTION {
            results.warn("Dimensions: Resolution X seems to be very high");
        }
        if render.resolution_y < MIN_RESOLUTION {
            results.warn("Dimensions: Resolution Y seems to be very low");
        }
        if !distributed && render.resolution_y > MAX_RESOLUTION {
            results.warn("Dimensions: Resolution Y seems to be very high");
        }
        if render.resolution_percentage != 100 {
            results.warn("Dimensions: Resolution Percentage is not 100%");
        }
        if render.frame_step != 1 {
            results.error("Dimensions: Frame Range Step has to be 1");
        }
        if render.use_border {
            results.warn_with("Dimensions: Border is active", RemediationType::DisableRenderBorder);
            if render.use_crop_to_border {
                results.warn("Dimensions: Crop is active");
            }
        }
        if render.use_stamp {
            results.error("Stamp: not allowed");
        }
    }

    fn test_output(
        render: &RenderSettings,
        project: &str,
        scene_name: &str,
        results: &mut ResultWriter<'_>,
    ) {
        let render_path = resolve_host_path(&render.filepath, project, None);
        let output_name = file_name(&render.filepath);
        let render_dir = render_path.parent().unwrap_or_else(|| Path::new(""));
        if output_name.is_empty() || render_dir.as_os_str().is_empty() || !render_dir.exists() {
            results.error_with(
                "Output: Requires filename",
                RemediationType::FixOutput,
                scene_name,
                "",
            );
        }

        let format = render.file_format.to_uppercase();
        if !PICTURE_FORMATS.contains(&format.as_str()) {
            results.error_with(
                "Output: Only single image formats are supported",
                RemediationType::FixOutput,
                scene_name,
                "",
            );
        }
        if format == "TIFF" && render.tiff_codec.as_deref() == Some("NONE") {
            results.error("Output: TIFF Compression must be activated");
        }
    }

    fn test_distributed(
        render: &RenderSettings,
        nodes: &[CompositorNode],
        results: &mut ResultWriter<'_>,
    ) {
        let format = render.file_format.as_str();
        if !DISTRIBUTED_FORMATS.contains(&format) {
            results.error("Output: File format not allowed for distributed render - use PNG instead");
        }
        if render.use_compositing {
            let blacklisted: Vec<&CompositorNode> = nodes
                .iter()
                .filter(|n| DISTRIBUTED_NODE_BLACKLIST.contains(&n.node_type.as_str()))
                .collect();
            if !blacklisted.is_empty() {
                let mut listed: String = blacklisted
                    .iter()
                    .take(BLACKLIST_LISTED_NODES)
                    .map(|n| format!("{}, ", n.name))
                    .collect();
                if blacklisted.len() > BLACKLIST_LISTED_NODES {
                    listed.push_str("...");
                }
                results.error(format!(
                    "Post Processing: These nodes are not supported for distributed render: {}",
                    listed
                ));
            }
        }
        if render.use_freestyle {
            results.error("Freestyle: Because of a bug in Blender, currently not allowed for distributed render.");
        }
        if render.resolution_x % 10 != 0 || render.resolution_y % 10 != 0 {
            results.error("Output: for distributed rendering your resolution must be divisible by ten.");
        }
        if SIZE_LIMITED_FORMATS.contains(&format)
            && (render.resolution_x > MAX_DISTRIBUTED_RESOLUTION
                || render.resolution_y > MAX_DISTRIBUTED_RESOLUTION)
        {
            results.error("Output: format not supported for resolutions over 16000, use EXR instead.");
        }
        if render.use_border {
            results.error("Dimensions: Border is not allowed for distributed render");
        }
    }

    fn test_engine_notices(render: &RenderSettings, distributed: bool, results: &mut ResultWriter<'_>) {
        match render.engine.as_str() {
            "CYCLES" => {
                if render.is_gpu_render() {
                    if distributed {
                        results.info("Cycles Device: Distributed render is only supported on CPU so your job will render on CPU instead.");
                    } else {
                        results.info(format!("Cycles Device: {}", GPU_COST_NOTICE));
                    }
                } else if render.device.as_deref() == Some("CPU") {
                    results.info("Cycles Device: The farm will render your scene on CPU.");
                }
                if render.samples.unwrap_or(0) > MAX_CYCLES_SAMPLES {
                    results.warn_with(
                        "Cycles: Samples seem to be very high",
                        RemediationType::FixCyclesSamples,
                    );
                }
            }
            "BLENDER_EEVEE" => {
                results.warn("ATTENTION. Blender Eevee is implemented as Beta for testing.");
                results.info(format!("Eevee: {}", GPU_COST_NOTICE));
            }
            _ => {}
        }
    }

    fn test_scripted_drivers(scene: &dyn SceneAccessor, results: &mut ResultWriter<'_>) {
        for kind in DRIVER_KINDS {
            for block in scene.animated_blocks().iter().filter(|b| b.kind == *kind) {
                for driver in block.drivers.iter().filter(|d| d.driver_type == DriverType::Scripted) {
                    results.error_with(
                        format!(
                            "Scripted Expressions are unsupported. ( Object: '{}', Expression: {} ) ",
                            block.name, driver.expression
                        ),
                        RemediationType::BakeScriptedDrivers,
                        &block.name,
                        &driver.expression,
                    );
                }
            }
        }
    }

    fn fill_region(
        render: &RenderSettings,
        export: &mut ExportContext<'_>,
        host_version: &str,
        farm_output: &str,
        original_output: &Path,
        gpu: bool,
    ) {
        let region = export.descriptor.section(REGION_SECTION);
        if gpu {
            region.set("blenderGPU", "1");
        }
        region.set("user", export.validator.user());
        region.set("units", "0");
        region.set("program", "BLENDER");
        region.set("version", host_version);
        region.set("renderer", renderer_id(render, gpu));
        region.set("startframe", format!("{} ", render.frame_start));
        region.set("endframe", format!(" {}", render.frame_end));
        region.set("resolution", format!("{}x{}", render.resolution_x, render.resolution_y));
        region.set("OS", os_label());
        region.set("Bits", bits_label());

        let is_vray = VRAY_ENGINES.contains(&render.engine.as_str());
        region.set("output", if is_vray { String::new() } else { format!("{}.txt", farm_output) });

        let download = local_download_path(original_output);
        region.set("downloadpath", if download.len() > 2 { download } else { String::new() });
        region.set("localRend", "2");
    }
}

impl Validator for RenderSettingsValidator {
    fn name(&self) -> &'static str { "Render Settings" }

    fn test(&self, scene: &dyn SceneAccessor, ctx: &ValidatorContext, results: &mut ResultWriter<'_>) {
        let render = scene.render();
        let project = scene.project();
        let distributed = ctx.distributed();

        if !SUPPORTED_ENGINES.contains(&render.engine.as_str()) {
            results.error("Engine: Render engine not supported");
        }
        if render.camera.as_deref().map_or(true, str::is_empty) {
            results.error_with(
                "Camera: Camera missing. Add a camera object to the scene.",
                RemediationType::FixCamera,
                "",
                "",
            );
        }

        let mut active_layers = 0;
        for layer in render.view_layers.iter().filter(|l| l.use_for_render) {
            results.info(format!("Layers: Active Render Layer is \"{}\"", layer.name));
            active_layers += 1;
        }
        if active_layers == 0 {
            results.error("Layers: No Render Layer is active");
        }

        Self::test_dimensions(render, distributed, results);
        Self::test_output(render, &project.filepath, &project.scene_name, results);
        if distributed {
            Self::test_distributed(render, scene.compositor_nodes(), results);
        }
        Self::test_engine_notices(render, distributed, results);

        for node in file_output_nodes(scene.compositor_nodes()) {
            let target = output_node_target(&node.base_path);
            if target.is_empty() {
                results.error(format!(
                    "Compositing Node( File Output ): 'Base Path' unset. ( {} ) ",
                    node.name
                ));
            } else if target == render.filepath {
                results.error(format!(
                    "Compositing Node( File Output ): 'Render Output Path' and 'Node Base Path' must be different. ( {} ) ",
                    node.name
                ));
            }
        }

        Self::test_scripted_drivers(scene, results);
    }

    fn prepare_save(
        &mut self,
        scene: &mut dyn SceneAccessor,
        export: &mut ExportContext<'_>,
    ) -> Result<(), PipelineError> {
        let render = scene.render().clone();
        let project = scene.project().clone();
        let ctx = export.validator;
        let user = ctx.user().to_string();
        let distributed = ctx.distributed();
        let gpu = render.is_gpu_render() && !distributed;

        let original_output = resolve_host_path(&render.filepath, &project.filepath, None);
        let farm_output = farm_output_path(&user, &original_output.display().to_string());

        let attr = |name: &'static str| PropertyHandle::direct(OwnerRef::Render, name);
        self.ledger.apply(scene, attr("filepath"), &farm_output)?;
        self.ledger.apply(scene, attr("threads_mode"), "AUTO")?;
        self.ledger.apply(scene, attr("quality"), "100")?;

        if render.engine == "CYCLES" && render.tile_size.is_some() {
            let tile_attribute = ctx.capabilities.cycles_tile_attribute();
            self.ledger.apply(scene, attr(tile_attribute), CYCLES_TILE_SIZE)?;
        }

        let tile = (if gpu { GPU_TILE_SIZE } else { CPU_TILE_SIZE }).to_string();
        if render.tile_x.is_some() {
            self.ledger.apply(scene, attr("tile_x"), &tile)?;
        }
        if render.tile_y.is_some() {
            self.ledger.apply(scene, attr("tile_y"), &tile)?;
        }

        Self::fill_region(
            &render,
            export,
            &project.host_version.to_string(),
            &farm_output,
            &original_output,
            gpu,
        );

        self.ledger.apply(scene, attr("frame_current"), &render.frame_start.to_string())?;

        if !distributed {
            let targets = unique_output_targets(scene.compositor_nodes());
            for (node, target) in targets {
                let owner = OwnerRef::CompositorNode { name: node };
                self.ledger.apply(
                    scene,
                    PropertyHandle::direct(owner, "base_path"),
                    &farm_output_path(&user, &target),
                )?;
            }
        }
        Ok(())
    }

    fn post_save(&mut self, scene: &mut dyn SceneAccessor) -> Result<(), SceneError> {
        self.ledger.restore_all(scene).map(|_| ())
    }

    fn pending_restores(&self) -> usize {
        self.ledger.len()
    }

    fn further_action(
        &mut self,
        scene: &mut dyn SceneAccessor,
        _ctx: &ValidatorContext,
        entry: &DiagnosticEntry,
    ) -> Result<RemediationOutcome, SceneError> {
        match entry.remediation {
            Some(RemediationType::FixCyclesSamples) => {
                scene.write_property(&OwnerRef::Render, "samples", &MAX_CYCLES_SAMPLES.to_string())?;
                Ok(RemediationOutcome::Applied(1))
            }
            _ => Ok(RemediationOutcome::Surfaced(entry.message.clone())),
        }
    }
}
