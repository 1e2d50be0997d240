//! Asset and cache discovery against scenes on a temporary disk.

use std::fs;
use std::path::Path;

use farminizer_core::validators::caches::{classify, discover_cache_references, CacheKind};
use farminizer_core::validators::TextureAndCacheValidator;
use farminizer_core::{
    ClientSettings, ForeignManifest, HostCapabilities, JobOptions, MemoryScene, RemediationType,
    ResultLog, Severity, Validator, ValidatorContext,
};
use serde_json::{json, Value};

fn context(root: &Path) -> ValidatorContext {
    ValidatorContext {
        settings: ClientSettings {
            user_name: "alice".into(),
            default_path: root.join("farm"),
            ..Default::default()
        },
        options: JobOptions::default(),
        capabilities: HostCapabilities::for_version(&semver::Version::new(3, 6, 0)),
        foreign_manifest: ForeignManifest::default(),
    }
}

fn scene(root: &Path, body: Value) -> MemoryScene {
    let mut value = json!({
        "project": {"filepath": root.join("shot.blend"), "scene_name": "Scene", "host_version": "3.6.0"}
    });
    if let (Some(target), Some(body)) = (value.as_object_mut(), body.as_object()) {
        for (k, v) in body {
            target.insert(k.clone(), v.clone());
        }
    }
    MemoryScene::from_value(value).unwrap()
}

fn texture_check(scene: &MemoryScene, root: &Path) -> ResultLog {
    let mut log = ResultLog::new();
    TextureAndCacheValidator::new().test(scene, &context(root), &mut log.writer(Some("Texture")));
    log
}

#[test]
fn test_empty_scene() {
    let dir = tempfile::tempdir().unwrap();
    let scene = scene(dir.path(), json!({}));

    assert!(discover_cache_references(&scene, &context(dir.path()).capabilities).is_empty());
    assert!(texture_check(&scene, dir.path()).is_empty());
}

#[test]
fn test_discovery_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let scene = scene(
        dir.path(),
        json!({"objects": [
            {"name": "Flag", "modifiers": [{"name": "Cloth", "type": "cloth", "point_caches": [{"name": "c"}]}]},
            {"name": "Sea", "modifiers": [{"name": "Ocean", "type": "ocean", "is_cached": true, "filepath": "//ocean"}]},
            {"name": "Rock", "modifiers": [{"name": "MeshCache", "type": "mesh_cache", "filepath": "//rock.pc2"}]}
        ]}),
    );
    let caps = context(dir.path()).capabilities;

    let first = discover_cache_references(&scene, &caps);
    let second = discover_cache_references(&scene, &caps);
    assert_eq!(first, second);

    let kinds: Vec<CacheKind> = first.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![CacheKind::PointCache, CacheKind::Ocean, CacheKind::MeshCache]);
}

#[test]
fn test_filename_allow_list() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("tex01.png"), b"png").unwrap();
    fs::write(dir.path().join("tex:01.png"), b"png").unwrap();

    let good = scene(dir.path(), json!({"file_blocks": [
        {"kind": "image", "name": "good", "filepath": "//tex01.png"}
    ]}));
    assert_eq!(texture_check(&good, dir.path()).count(Severity::Error), 0);

    let bad = scene(dir.path(), json!({"file_blocks": [
        {"kind": "image", "name": "bad", "filepath": "//tex:01.png"}
    ]}));
    let log = texture_check(&bad, dir.path());
    assert_eq!(log.count(Severity::Error), 1);
    assert!(log.entries()[0].message.contains("tex:01.png"));
}

#[test]
fn test_udim_reports_each_missing_tile() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("wall.1001.png"), b"tile").unwrap();
    let scene = scene(dir.path(), json!({"file_blocks": [
        {"kind": "image", "name": "wall", "filepath": "//wall.<UDIM>.png", "source": "TILED", "tiles": [1001, 1002]}
    ]}));

    let log = texture_check(&scene, dir.path());
    let errors: Vec<_> = log.errors().collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("wall.1002.png"));
    assert_eq!(errors[0].remediation, Some(RemediationType::ReplaceMissingImage));
    assert_eq!(errors[0].param1, "wall");
}

#[test]
fn test_unbaked_cloth() {
    let dir = tempfile::tempdir().unwrap();
    let scene = scene(dir.path(), json!({"objects": [
        {"name": "Flag", "modifiers": [{"name": "Sim", "type": "cloth", "point_caches": [{"name": "c"}]}]}
    ]}));

    let log = texture_check(&scene, dir.path());
    let errors: Vec<_> = log.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].remediation.map(|r| r.code()), Some(6));
    assert_eq!(errors[0].param1, "Flag");
    assert_eq!(errors[0].param2, "Sim");
    assert_eq!(errors[0].source.as_deref(), Some("Texture"));
}

#[test]
fn test_ocean_bake_state() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("shot.blend").display().to_string();
    let objects = |cached: bool| {
        json!({"objects": [
            {"name": "Sea", "modifiers": [{"name": "Ocean", "type": "ocean", "is_cached": cached, "filepath": "//ocean"}]}
        ]})
    };
    let caps = context(dir.path()).capabilities;

    let unbaked = scene(dir.path(), objects(false));
    let refs = discover_cache_references(&unbaked, &caps);
    let mut log = ResultLog::new();
    classify(&refs[0], &project, &mut log.writer(None));
    assert_eq!(log.count(Severity::Error), 1);
    assert_eq!(log.entries()[0].remediation, Some(RemediationType::BakeOcean));
    assert_eq!(log.entries()[0].remediation.map(|r| r.code()), Some(3));

    let baked = scene(dir.path(), objects(true));
    let refs = discover_cache_references(&baked, &caps);
    let mut log = ResultLog::new();
    classify(&refs[0], &project, &mut log.writer(None));
    assert!(log.is_empty());
}

#[test]
fn test_missing_mesh_cache() {
    let dir = tempfile::tempdir().unwrap();
    let scene = scene(dir.path(), json!({"objects": [
        {"name": "Rock", "modifiers": [{"name": "MeshCache", "type": "mesh_cache", "filepath": "//rock.pc2"}]}
    ]}));

    let log = texture_check(&scene, dir.path());
    assert_eq!(log.count(Severity::Error), 1);
    assert_eq!(log.entries()[0].remediation, Some(RemediationType::MeshCacheFilepath));

    fs::write(dir.path().join("rock.pc2"), b"pc2").unwrap();
    assert!(texture_check(&scene, dir.path()).is_empty());
}
