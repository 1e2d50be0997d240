//! End-to-end exports into a temporary farm folder.

use std::fs;
use std::path::Path;

use farminizer_core::{
    ClientSettings, JobOptions, MemoryScene, Orchestrator, PipelineState, RemediationOutcome,
    RemediationType, SceneAccessor,
};
use serde_json::{json, Value};

fn scene(root: &Path, extra: Value) -> MemoryScene {
    let project = root.join("shot.blend");
    fs::write(&project, b"blend").unwrap();
    fs::create_dir_all(root.join("render")).unwrap();

    let mut value = json!({
        "project": {"filepath": project, "scene_name": "Scene", "host_version": "3.6.0"},
        "render": {
            "engine": "CYCLES",
            "camera": "Camera",
            "view_layers": [{"name": "ViewLayer"}],
            "filepath": root.join("render").join("frame_"),
            "frame_start": 1,
            "frame_end": 10
        }
    });
    if let (Some(target), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
    MemoryScene::from_value(value).unwrap()
}

fn orchestrator(root: &Path, options: JobOptions) -> Orchestrator {
    let settings = ClientSettings {
        user_name: "alice".into(),
        default_path: root.join("farm"),
        plugin_version: "1.0.0".into(),
        ..Default::default()
    };
    Orchestrator::new(Some(settings), options)
}

/// Value of `key` in `[section]` of an INI-style descriptor.
fn ini_value(ini: &str, section: &str, key: &str) -> Option<String> {
    let header = format!("[{}]", section);
    let mut in_section = false;
    for line in ini.lines() {
        if line.starts_with('[') {
            in_section = line == header;
        } else if in_section {
            if let Some((k, v)) = line.split_once('=') {
                if k == key {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

#[test]
fn test_export_writes_copy_and_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("wood.png"), b"wood").unwrap();
    let mut scene = scene(dir.path(), json!({"file_blocks": [
        {"kind": "image", "name": "wood", "filepath": "//wood.png"}
    ]}));

    let mut orchestrator = orchestrator(dir.path(), JobOptions::default());
    let outcome = orchestrator.export(&mut scene).unwrap();

    assert_eq!(orchestrator.state(), PipelineState::Exported);
    assert_eq!(outcome.project_path, dir.path().join("farm").join("alice").join("shot.blend"));
    assert!(outcome.project_path.is_file());
    assert_eq!(outcome.manifest.len(), 1);
    assert_eq!(outcome.manifest.assets()[0].logical_path, "tex/wood.png");

    let ini = fs::read_to_string(&outcome.descriptor_path).unwrap();
    assert!(ini.starts_with("[region]"));
    assert_eq!(ini_value(&ini, "region", "user").as_deref(), Some("alice"));
    assert_eq!(ini_value(&ini, "region", "renderer").as_deref(), Some("CYCLES"));
    assert_eq!(ini_value(&ini, "region", "output").as_deref(), Some("C:\\logs\\output\\alice\\frame_.txt"));
    assert_eq!(ini_value(&ini, "region", "notifyCompletedit").as_deref(), Some("True"));
    assert_eq!(ini_value(&ini, "files", "paths").as_deref(), Some("1"));
    assert_eq!(ini_value(&ini, "files", "path0").as_deref(), Some("tex/wood.png"));
    assert_eq!(ini_value(&ini, "files", "pathsize0").as_deref(), Some("4"));
    assert_eq!(ini_value(&ini, "checksum", "manifest"), Some(outcome.manifest_hash.clone()));
    assert_eq!(ini_value(&ini, "checksum", "check").map(|c| c.len()), Some(64));

    // The scene points back at the local texture.
    assert_eq!(
        scene.file_blocks()[0].filepath,
        dir.path().join("wood.png").display().to_string()
    );
    let last = orchestrator.results().entries().last().unwrap();
    assert_eq!(last.message, "Project has been successfully exported!");
}

#[test]
fn test_second_export_gets_unique_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut scene = scene(dir.path(), json!({}));
    let mut orchestrator = orchestrator(dir.path(), JobOptions::default());

    let first = orchestrator.export(&mut scene).unwrap();
    let second = orchestrator.export(&mut scene).unwrap();

    assert_eq!(first.project_path.file_name().unwrap(), "shot.blend");
    assert_eq!(second.project_path.file_name().unwrap(), "shot_1.blend");
    assert_ne!(first.job_id, second.job_id);
    assert_eq!(first.manifest_hash, second.manifest_hash);
}

#[test]
fn test_ocean_caches_stay_apart() {
    let dir = tempfile::tempdir().unwrap();
    for folder in ["ocean_a", "ocean_b"] {
        fs::create_dir(dir.path().join(folder)).unwrap();
        fs::write(dir.path().join(folder).join("disp_0001.exr"), b"exr").unwrap();
    }
    let mut scene = scene(dir.path(), json!({"objects": [
        {"name": "SeaA", "modifiers": [{"name": "Ocean", "type": "ocean", "is_cached": true, "filepath": "//ocean_a"}]},
        {"name": "SeaB", "modifiers": [{"name": "Ocean", "type": "ocean", "is_cached": true, "filepath": "//ocean_b"}]}
    ]}));

    let mut orchestrator = orchestrator(dir.path(), JobOptions::default());
    let outcome = orchestrator.export(&mut scene).unwrap();

    let logical: Vec<&str> = outcome
        .manifest
        .assets()
        .iter()
        .map(|a| a.logical_path.as_str())
        .collect();
    assert_eq!(logical, vec!["tex/cache_0/disp_0001.exr", "tex/cache_1/disp_0001.exr"]);

    let saved: Value = serde_json::from_slice(&fs::read(&outcome.project_path).unwrap()).unwrap();
    assert_eq!(saved["objects"][0]["modifiers"][0]["filepath"], "X:\\alice\\tex\\cache_0\\");
    assert_eq!(saved["objects"][1]["modifiers"][0]["filepath"], "X:\\alice\\tex\\cache_1\\");
}

#[test]
fn test_job_options_reach_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let mut scene = scene(dir.path(), json!({"batch_scenes": [
        {"name": "Closeup", "resolution_x": 1280, "resolution_y": 720, "frame_start": 5,
         "frame_end": 9, "filepath": "/out/closeup_", "file_format": "", "camera": "Cam2"}
    ]}));
    let options = JobOptions {
        priority: "3".into(),
        send_email: true,
        notify_on_finish: true,
        cost_estimation: true,
        batch_render: true,
        ..Default::default()
    };

    let mut orchestrator = orchestrator(dir.path(), options);
    let outcome = orchestrator.export(&mut scene).unwrap();
    let ini = fs::read_to_string(&outcome.descriptor_path).unwrap();

    assert_eq!(ini_value(&ini, "region", "prio").as_deref(), Some("3"));
    assert_eq!(ini_value(&ini, "region", "notifyComplete").as_deref(), Some("1"));
    assert_eq!(ini_value(&ini, "region", "notifyCompletedit"), None);
    assert_eq!(ini_value(&ini, "region", "estimationFrames").as_deref(), Some("3"));
    assert_eq!(ini_value(&ini, "region", "autostart").as_deref(), Some("1"));

    assert_eq!(ini_value(&ini, "SeparateJobs", "section0").as_deref(), Some("Closeup"));
    assert_eq!(ini_value(&ini, "Closeup", "frames").as_deref(), Some("5 9 1"));
    assert_eq!(ini_value(&ini, "Closeup", "resolution").as_deref(), Some("1280x720"));
    assert_eq!(ini_value(&ini, "Closeup", "output").as_deref(), Some("C:\\logs\\output\\alice\\closeup_.PNG"));
    assert_eq!(ini_value(&ini, "Closeup", "camera").as_deref(), Some("Cam2"));
}

#[test]
fn test_border_warning_is_fixed_by_registry() {
    let dir = tempfile::tempdir().unwrap();
    let mut scene = scene(dir.path(), json!({}));
    let mut snapshot = scene.snapshot().clone();
    snapshot.render.use_border = true;
    scene = MemoryScene::new(snapshot);

    let mut orchestrator = orchestrator(dir.path(), JobOptions::default());
    assert!(orchestrator.check(&scene, true));
    let index = orchestrator
        .results()
        .entries()
        .iter()
        .position(|e| e.remediation == Some(RemediationType::DisableRenderBorder))
        .unwrap();

    let outcome = orchestrator.further_action(&mut scene, index).unwrap();
    assert_eq!(outcome, RemediationOutcome::Applied(1));
    assert!(!scene.render().use_border);
}

#[test]
fn test_unregistered_remediation_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let mut scene = scene(dir.path(), json!({"objects": [
        {"name": "Flag", "modifiers": [{"name": "Cloth", "type": "cloth", "point_caches": [{"name": "c"}]}]}
    ]}));

    let mut orchestrator = orchestrator(dir.path(), JobOptions::default());
    assert!(!orchestrator.check(&scene, false));
    let index = orchestrator
        .results()
        .entries()
        .iter()
        .position(|e| e.remediation == Some(RemediationType::BakeCloth))
        .unwrap();

    match orchestrator.further_action(&mut scene, index).unwrap() {
        RemediationOutcome::Surfaced(message) => assert!(message.starts_with("Cloth Modifier")),
        other => panic!("expected surfaced message, got {:?}", other),
    }
    assert!(orchestrator.further_action(&mut scene, 999).is_err());
}

#[test]
fn test_report_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let scene = scene(dir.path(), json!({}));
    let mut orchestrator = orchestrator(dir.path(), JobOptions::default());
    orchestrator.check(&scene, true);

    let path = dir.path().join("report.txt");
    orchestrator.write_report(&scene, &path).unwrap();
    let report = fs::read_to_string(&path).unwrap();

    assert!(report.starts_with("Logfile written by Farminizer"));
    assert!(report.contains("Client Document: shot.blend"));
    assert!(report.contains("No textures have been checked."));
    assert!(report.contains("Render Settings:"));
}
