//! Cache Discovery - Simulation And Bake References
//!
//! One pass over every modifier of every object, then every volume block,
//! yields a flat list of [`CacheReference`]s. The same list drives both the
//! check (`classify`) and the export (`stage`), so the two can never disagree
//! about what a scene depends on.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::ledger::MutationLedger;
use crate::manifest::AssetManifest;
use crate::paths::{file_name, resolve_host_path};
use crate::results::{RemediationType, ResultWriter};
use crate::scene::{
    FluidType, HostCapabilities, LegacyFluidType, ModifierKind, OwnerRef, ParticleType,
    PhysicsType, PointCache, PropertyHandle, SceneAccessor, SceneError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheKind {
    PointCache,
    Ocean,
    MeshCache,
    LegacyFluidSimulation,
    VolumetricFluid,
    Volume,
}

/// Modifier family owning a point cache. Picks the remediation for an
/// unbaked cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PointCacheOwner {
    Smoke,
    /// Modern fluid domain whose mesh is not baked yet.
    Fluid,
    Cloth,
    Hair { use_hair_dynamics: bool },
    Emitter,
    DynamicPaint,
}

/// Kind-specific payload of a [`CacheReference`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum CacheSource {
    PointCache {
        owner: PointCacheOwner,
        cache: PointCache,
        /// Position of the cache on its modifier; `None` for the stand-in
        /// cache of fluid domains on hosts without one.
        slot: Option<usize>,
    },
    Ocean { is_cached: bool },
    MeshCache,
    LegacyFluidSimulation,
    VolumetricFluid,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheReference {
    /// Owning object; the volume name for volume blocks.
    pub object: String,
    /// Owning modifier; empty for volume blocks.
    pub modifier: String,
    /// Absolute location on disk: a file for mesh caches, a folder otherwise.
    pub on_disk_path: PathBuf,
    pub display_name: String,
    pub source: CacheSource,
}

impl CacheReference {
    pub fn kind(&self) -> CacheKind {
        match self.source {
            CacheSource::PointCache { .. } => CacheKind::PointCache,
            CacheSource::Ocean { .. } => CacheKind::Ocean,
            CacheSource::MeshCache => CacheKind::MeshCache,
            CacheSource::LegacyFluidSimulation => CacheKind::LegacyFluidSimulation,
            CacheSource::VolumetricFluid => CacheKind::VolumetricFluid,
            CacheSource::Volume => CacheKind::Volume,
        }
    }

    fn notice(&self) -> String {
        format!("object: \"{}\" modifier: \"{}\"", self.object, self.modifier)
    }

    fn modifier_owner(&self) -> OwnerRef {
        OwnerRef::Modifier {
            object: self.object.clone(),
            modifier: self.modifier.clone(),
        }
    }
}

/// Walks the scene and returns every cache reference, in scene order.
///
/// Reads nothing but the scene, so two calls without an intervening
/// mutation return identical lists.
pub fn discover_cache_references(
    scene: &dyn SceneAccessor,
    capabilities: &HostCapabilities,
) -> Vec<CacheReference> {
    let project = scene.project().filepath.as_str();
    let mut references = Vec::new();

    for object in scene.objects() {
        for modifier in &object.modifiers {
            let make = |on_disk_path: PathBuf, display_name: &str, source: CacheSource| CacheReference {
                object: object.name.clone(),
                modifier: modifier.name.clone(),
                on_disk_path,
                display_name: display_name.to_string(),
                source,
            };
            let point_caches = |owner: PointCacheOwner, caches: &[PointCache]| {
                caches
                    .iter()
                    .enumerate()
                    .map(|(slot, cache)| {
                        make(
                            resolve_host_path(&cache.filepath, project, None),
                            &cache.name,
                            CacheSource::PointCache {
                                owner,
                                cache: cache.clone(),
                                slot: Some(slot),
                            },
                        )
                    })
                    .collect::<Vec<_>>()
            };

            match &modifier.kind {
                ModifierKind::Smoke { is_domain: true, point_caches: caches } => {
                    references.extend(point_caches(PointCacheOwner::Smoke, caches));
                }
                ModifierKind::Fluid {
                    fluid_type: FluidType::Domain,
                    has_cache_baked_mesh,
                    cache_directory,
                    point_caches: caches,
                } => {
                    if !has_cache_baked_mesh {
                        if capabilities.fluid_domain_point_cache {
                            references.extend(point_caches(PointCacheOwner::Fluid, caches));
                        } else {
                            references.push(make(
                                PathBuf::new(),
                                "",
                                CacheSource::PointCache {
                                    owner: PointCacheOwner::Fluid,
                                    cache: PointCache::default(),
                                    slot: None,
                                },
                            ));
                        }
                    }
                    references.push(make(
                        volumetric_cache_folder(cache_directory, project),
                        &modifier.name,
                        CacheSource::VolumetricFluid,
                    ));
                }
                ModifierKind::Cloth { point_caches: caches } => {
                    references.extend(point_caches(PointCacheOwner::Cloth, caches));
                }
                ModifierKind::ParticleSystem {
                    settings_type,
                    physics_type,
                    use_hair_dynamics,
                    point_caches: caches,
                } => {
                    if matches!(physics_type, Some(PhysicsType::No | PhysicsType::Keyed)) {
                        continue;
                    }
                    let owner = match settings_type {
                        ParticleType::Hair => PointCacheOwner::Hair {
                            use_hair_dynamics: *use_hair_dynamics,
                        },
                        ParticleType::Emitter => PointCacheOwner::Emitter,
                    };
                    references.extend(point_caches(owner, caches));
                }
                ModifierKind::DynamicPaint {
                    is_canvas: true,
                    canvas_surfaces: Some(surfaces),
                } => {
                    let caches: Vec<PointCache> = surfaces
                        .iter()
                        .flat_map(|s| s.point_caches.iter().cloned())
                        .collect();
                    references.extend(point_caches(PointCacheOwner::DynamicPaint, &caches));
                }
                ModifierKind::Ocean { is_cached, filepath } => {
                    references.push(make(
                        resolve_host_path(filepath, project, None),
                        &modifier.name,
                        CacheSource::Ocean { is_cached: *is_cached },
                    ));
                }
                ModifierKind::FluidSimulation {
                    settings_type: LegacyFluidType::Domain | LegacyFluidType::Particle,
                    filepath,
                } => {
                    references.push(make(
                        resolve_host_path(filepath, project, None),
                        &modifier.name,
                        CacheSource::LegacyFluidSimulation,
                    ));
                }
                ModifierKind::MeshCache { filepath } => {
                    references.push(make(
                        resolve_host_path(filepath, project, None),
                        &modifier.name,
                        CacheSource::MeshCache,
                    ));
                }
                _ => {}
            }
        }
    }

    for volume in scene.volumes() {
        let resolved = resolve_host_path(&volume.filepath, project, None);
        references.push(CacheReference {
            object: volume.name.clone(),
            modifier: String::new(),
            on_disk_path: resolved.parent().map(Path::to_path_buf).unwrap_or_default(),
            display_name: volume.name.clone(),
            source: CacheSource::Volume,
        });
    }

    references
}

/// Cache directories may be stored relative; those hang off the project folder.
fn volumetric_cache_folder(cache_directory: &str, project: &str) -> PathBuf {
    let resolved = resolve_host_path(cache_directory, project, None);
    if resolved.is_absolute() {
        return resolved;
    }
    let project_dir = Path::new(project).parent().unwrap_or_else(|| Path::new(""));
    project_dir.join(resolved)
}

/// `<project dir>/blendcache_<project stem>`, where disk caches land by default.
pub fn implicit_cache_folder(project: &str) -> (String, PathBuf) {
    let path = Path::new(project);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let folder_name = format!("blendcache_{}", stem);
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let folder = dir.join(&folder_name);
    (folder_name, folder)
}

fn has_any_file(folder: &Path) -> bool {
    folder.exists()
        && WalkDir::new(folder)
            .into_iter()
            .filter_map(Result::ok)
            .any(|entry| entry.file_type().is_file())
}

fn has_direct_entries(folder: &Path) -> bool {
    fs::read_dir(folder)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Appends the diagnostics for one reference.
pub fn classify(reference: &CacheReference, project: &str, results: &mut ResultWriter<'_>) {
    let notice = reference.notice();
    let object = reference.object.as_str();
    let modifier = reference.modifier.as_str();
    let folder = &reference.on_disk_path;

    match &reference.source {
        CacheSource::Ocean { is_cached } => {
            if !is_cached {
                results.error_with(
                    format!("Ocean Modifier: Was not baked. {}", notice),
                    RemediationType::BakeOcean,
                    object,
                    modifier,
                );
            }
        }
        CacheSource::MeshCache => {
            if !folder.exists() {
                results.error_with(
                    format!("MeshCache: File not found. {} {}", folder.display(), notice),
                    RemediationType::MeshCacheFilepath,
                    object,
                    modifier,
                );
            }
        }
        CacheSource::LegacyFluidSimulation => {
            if !folder.exists() || !has_direct_entries(folder) {
                results.error_with(
                    format!("Fluid Modifier: Was not baked. {}", notice),
                    RemediationType::BakeFluidSimulation,
                    object,
                    modifier,
                );
            }
        }
        CacheSource::VolumetricFluid => {
            if !has_any_file(folder) {
                results.error_with(
                    format!("Fluid Modifier: Was not baked. {}", notice),
                    RemediationType::BakeFluidDomain,
                    object,
                    "",
                );
            }
        }
        CacheSource::Volume => {}
        CacheSource::PointCache { owner, cache, .. } => {
            classify_point_cache(*owner, cache, reference, project, results)
        }
    }
}

fn classify_point_cache(
    owner: PointCacheOwner,
    cache: &PointCache,
    reference: &CacheReference,
    project: &str,
    results: &mut ResultWriter<'_>,
) {
    let notice = reference.notice();
    let object = reference.object.as_str();
    let modifier = reference.modifier.as_str();

    if !cache.is_baked && !cache.use_external {
        match owner {
            PointCacheOwner::Cloth => results.error_with(
                format!(
                    "Cloth Modifier: Cloth Cache Was never baked. Bake or use external files. {}",
                    notice
                ),
                RemediationType::BakeCloth,
                object,
                modifier,
            ),
            PointCacheOwner::Fluid => results.error_with(
                format!("Fluid Simulation was not baked. {}", notice),
                RemediationType::BakeFluidDomain,
                object,
                "",
            ),
            PointCacheOwner::Hair { use_hair_dynamics } => {
                if use_hair_dynamics {
                    results.error_with(
                        format!("Hair dynamics: PointCache Was not baked. Bake or use external. {}", notice),
                        RemediationType::BakeHairDynamics,
                        object,
                        "",
                    );
                }
            }
            PointCacheOwner::Emitter => results.error_with(
                format!("PointCache: Was not baked. Bake or use external. {}", notice),
                RemediationType::BakeParticles,
                object,
                "",
            ),
            PointCacheOwner::Smoke | PointCacheOwner::DynamicPaint => results.error(format!(
                "Modifier: Point Cache Was never baked. Bake or use external files. {}",
                notice
            )),
        }
        return;
    }

    if !cache.use_disk_cache && !cache.use_external {
        let remediation = match owner {
            PointCacheOwner::Cloth => RemediationType::BakeCloth,
            PointCacheOwner::Fluid => RemediationType::BakeFluidDomain,
            _ => RemediationType::BakeParticles,
        };
        results.error_with(
            format!(
                "PointCache: Disk Cache not activated, activate Disk Cache or use external. {}",
                notice
            ),
            remediation,
            object,
            modifier,
        );
    }

    if cache.use_external {
        if cache.filepath.is_empty() {
            results.error(format!("PointCache: External path empty. {}", notice));
        } else if !reference.on_disk_path.exists() {
            results.error(format!(
                "PointCache: Folder not found. {} {}",
                reference.on_disk_path.display(),
                notice
            ));
        }
    } else if cache.is_outdated {
        results.error(format!("PointCache: Cache outdated. Free bake and rebake. {}", notice));
    }

    if cache.name.is_empty() {
        results.error(format!(
            "Please enter a name for the Point Cache of \"{}\", object \"{}\".",
            modifier, object
        ));
    }

    if !cache.use_external && cache.use_disk_cache {
        let (_, folder) = implicit_cache_folder(project);
        if !folder.exists() {
            results.error(format!("PointCache: implicit folder not found. {}", folder.display()));
        }
    }
}

/// Stages the files of `folder` (non-recursive, dotfiles skipped) under
/// `tex/<subfolder>/`. Returns false when the folder does not exist.
fn stage_folder(folder: &Path, subfolder: &str, assets: &mut AssetManifest) -> bool {
    let Ok(entries) = fs::read_dir(folder) else {
        return false;
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let logical = if subfolder.is_empty() {
            format!("tex/{}", name)
        } else {
            format!("tex/{}/{}", subfolder, name)
        };
        assets.stage_file(logical, &path);
    }
    true
}

/// Stages the files behind one reference and points the owning property at
/// the farm-side copy. `index` is the reference's position in the discovery
/// list and keeps ocean caches apart.
pub fn stage(
    scene: &mut dyn SceneAccessor,
    reference: &CacheReference,
    index: usize,
    server: &str,
    assets: &mut AssetManifest,
    ledger: &mut MutationLedger,
) -> Result<(), SceneError> {
    let folder = reference.on_disk_path.as_path();

    match &reference.source {
        CacheSource::Ocean { .. } => {
            let unique = format!("cache_{}", index);
            if stage_folder(folder, &unique, assets) {
                ledger.apply(
                    scene,
                    PropertyHandle::filepath(reference.modifier_owner()),
                    &format!("{}\\{}\\", server, unique),
                )?;
            }
        }
        CacheSource::MeshCache => {
            if folder.is_file() {
                let name = file_name(&folder.display().to_string());
                assets.stage_file(format!("tex/{}", name), folder);
                ledger.apply(
                    scene,
                    PropertyHandle::filepath(reference.modifier_owner()),
                    &format!("{}\\{}", server, name),
                )?;
            }
        }
        CacheSource::LegacyFluidSimulation => {
            if stage_folder(folder, "", assets) {
                let owner = OwnerRef::ModifierSettings {
                    object: reference.object.clone(),
                    modifier: reference.modifier.clone(),
                };
                ledger.apply(scene, PropertyHandle::filepath(owner), server)?;
            }
        }
        CacheSource::VolumetricFluid => {
            let Ok(entries) = fs::read_dir(folder) else {
                return Ok(());
            };
            let base = folder
                .components()
                .last()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut subdirs: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            subdirs.sort();

            let mut staged_any = false;
            for subdir in subdirs {
                let name = subdir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                staged_any |= stage_folder(&subdir, &format!("{}/{}", base, name), assets);
            }
            if staged_any {
                let owner = OwnerRef::DomainSettings {
                    object: reference.object.clone(),
                    modifier: reference.modifier.clone(),
                };
                ledger.apply(
                    scene,
                    PropertyHandle::cache_directory(owner),
                    &format!("{}\\{}\\", server, base),
                )?;
            }
        }
        CacheSource::Volume => {
            if stage_folder(folder, "", assets) {
                let owner = OwnerRef::Volume { name: reference.object.clone() };
                let current = scene.read_property(&owner, "filepath")?;
                let project = scene.project().filepath.clone();
                let resolved = resolve_host_path(&current, &project, None);
                let name = file_name(&resolved.display().to_string());
                ledger.apply(
                    scene,
                    PropertyHandle::filepath(owner),
                    &format!("{}\\{}", server, name),
                )?;
            }
        }
        CacheSource::PointCache { cache, slot, .. } => {
            if cache.use_external {
                let Some(slot) = slot else {
                    return Ok(());
                };
                if stage_folder(folder, "", assets) {
                    let owner = OwnerRef::PointCache {
                        object: reference.object.clone(),
                        modifier: reference.modifier.clone(),
                        index: *slot,
                    };
                    ledger.apply(scene, PropertyHandle::filepath(owner), server)?;
                }
            } else {
                let project = scene.project().filepath.clone();
                stage_implicit_cache(&project, &cache.name, assets);
            }
        }
    }
    Ok(())
}

/// Files of the implicit cache folder whose names start with `cache_name`.
/// They keep their folder name in the bundle; nothing in the scene changes.
fn stage_implicit_cache(project: &str, cache_name: &str, assets: &mut AssetManifest) {
    let (folder_name, folder) = implicit_cache_folder(project);
    let Ok(entries) = fs::read_dir(&folder) else {
        return;
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(cache_name))
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        assets.stage_file(format!("{}/{}", folder_name, name), &path);
    }
}
