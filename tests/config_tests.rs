use photo_layer::camera::Rect;
use photo_layer::config::Configuration;
use photo_layer::photo_layer::RenderMode;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn parse_kebab_case_config_with_defaults() {
    let yaml = r#"
photo-library-path: "/photos"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.photo_library_path, PathBuf::from("/photos"));
    assert_eq!(cfg.max_cache_size.get(), 5);
    assert_eq!(cfg.loader_max_concurrent_decodes, 2);
    assert_eq!(cfg.hide_delay, Duration::from_millis(100));
    assert_eq!(cfg.dwell, Duration::from_secs(8));
    assert_eq!(cfg.mode, RenderMode::View);
    assert!(cfg.crop.is_none());
    assert!(!cfg.fullscreen);
    assert!(cfg.validated().is_ok());
}

#[test]
fn parse_full_config() {
    let yaml = r#"
photo-library-path: "/p"
max-cache-size: 3
loader-max-concurrent-decodes: 1
hide-delay: 250ms
dwell: 1m 30s
max-texture-dimension: 4096
startup-shuffle-seed: 7
mode: crop
crop: { x: 10, y: 20, width: 300, height: 200 }
fullscreen: true
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.max_cache_size.get(), 3);
    assert_eq!(cfg.loader_max_concurrent_decodes, 1);
    assert_eq!(cfg.hide_delay, Duration::from_millis(250));
    assert_eq!(cfg.dwell, Duration::from_secs(90));
    assert_eq!(cfg.max_texture_dimension, Some(4096));
    assert_eq!(cfg.startup_shuffle_seed, Some(7));
    assert_eq!(cfg.mode, RenderMode::Crop);
    assert_eq!(cfg.crop, Some(Rect::new(10.0, 20.0, 300.0, 200.0)));
    assert!(cfg.fullscreen);

    let options = cfg.cache_options();
    assert_eq!(options.max_cache_size.get(), 3);
    assert_eq!(options.max_dimension, Some(4096));
}

#[test]
fn zero_cache_size_is_rejected_while_parsing() {
    let yaml = r#"
photo-library-path: "/p"
max-cache-size: 0
"#;
    assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
}

#[test]
fn unknown_mode_is_rejected() {
    let yaml = r#"
photo-library-path: "/p"
mode: zoom
"#;
    assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
}

#[test]
fn validation_catches_runtime_invariants() {
    let missing_path = Configuration::default();
    assert!(missing_path.validated().is_err());

    let cfg: Configuration = serde_yaml::from_str(
        r#"
photo-library-path: "/p"
loader-max-concurrent-decodes: 0
"#,
    )
    .unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(err.to_string().contains("loader-max-concurrent-decodes"));

    let cfg: Configuration = serde_yaml::from_str(
        r#"
photo-library-path: "/p"
dwell: 0s
"#,
    )
    .unwrap();
    assert!(cfg.validated().is_err());

    let cfg: Configuration = serde_yaml::from_str(
        r#"
photo-library-path: "/p"
crop: { x: 0, y: 0, width: 0, height: 10 }
"#,
    )
    .unwrap();
    assert!(cfg.validated().is_err());
}

#[test]
fn from_yaml_file_reports_the_path() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.yaml");
    std::fs::write(&path, "photo-library-path: [not, a, path").unwrap();
    let err = Configuration::from_yaml_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("config.yaml"));

    let err = Configuration::from_yaml_file(tmp.path().join("absent.yaml")).unwrap_err();
    assert!(format!("{err:#}").contains("absent.yaml"));
}
