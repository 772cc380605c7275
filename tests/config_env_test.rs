use inwatch::{EventMask, Settings, WatchOptions};
use std::env;
use std::fs;
use tempfile::TempDir;

// Single test: the environment is process wide
#[test]
fn test_env_overrides_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    fs::write(
        &config_path,
        r#"
[watch]
events = ["create"]
auto_add = false

[dispatcher]
poll_interval_ms = 500
"#,
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("INWATCH_WATCH__AUTO_ADD", "true");
        env::set_var("INWATCH_DISPATCHER__AUTO_ADD_WARN_AFTER", "9");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("INWATCH_WATCH__AUTO_ADD");
        env::remove_var("INWATCH_DISPATCHER__AUTO_ADD_WARN_AFTER");
    }

    // Environment wins over the file
    assert!(settings.watch.auto_add);
    assert_eq!(settings.dispatcher.auto_add_warn_after, 9);
    // File wins over defaults
    assert_eq!(settings.watch.mask().unwrap(), EventMask::CREATE);
    assert_eq!(settings.dispatcher.poll_interval_ms, 500);
    assert_eq!(settings.watch.options(), WatchOptions::AUTO_ADD);
}
