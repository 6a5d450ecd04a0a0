//! Settings parser for .expod/config.toml

use std::path::Path;

use expod_core::prelude::*;
use expod_daemon::tunnel::TUNNEL_TIMEOUT_ENV;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const EXPOD_DIR: &str = ".expod";

/// Load settings from .expod/config.toml, then apply environment overrides
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let mut settings = read_settings_file(project_path);
    apply_env_overrides(&mut settings);
    settings
}

fn read_settings_file(project_path: &Path) -> Settings {
    let config_path = project_path.join(EXPOD_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// `EXPO_TUNNEL_TIMEOUT_MS` overrides `[tunnel] timeout_ms`
fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(value) = std::env::var(TUNNEL_TIMEOUT_ENV) {
        match value.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => settings.tunnel.timeout_ms = ms,
            _ => warn!("Ignoring invalid {}={:?}", TUNNEL_TIMEOUT_ENV, value),
        }
    }
}

/// Create a commented default config in .expod/
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let expod_dir = project_path.join(EXPOD_DIR);

    if !expod_dir.exists() {
        std::fs::create_dir_all(&expod_dir)
            .map_err(|e| Error::config(format!("Failed to create .expod dir: {}", e)))?;
    }

    let config_path = expod_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# expod configuration

[project]
# slug = "my-app"          # Defaults to the directory name
# owner = "my-account"     # Defaults to anonymous
# scheme = "myapp"         # Dev-client deep link scheme

[tunnel]
domain = "exp.direct"
binary = "ngrok"
timeout_ms = 10000
max_attempts = 3
collision_codes = ["ERR_NGROK_334", "103"]

[dev_session]
enabled = true
interval_secs = 20

[server]
native_port = 8081
web_port = 19006
port_probe_range = 20

[watcher]
debounce_ms = 500
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    #[serial]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let expod_dir = temp.path().join(".expod");
        std::fs::create_dir_all(&expod_dir).unwrap();

        let config = r#"
[project]
owner = "bacon"

[tunnel]
timeout_ms = 2500
collision_codes = ["ERR_NGROK_334"]

[server]
native_port = 8090
"#;
        std::fs::write(expod_dir.join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());
        assert_eq!(settings.project.owner.as_deref(), Some("bacon"));
        assert_eq!(settings.tunnel.timeout_ms, 2500);
        assert_eq!(settings.tunnel.collision_codes, vec!["ERR_NGROK_334"]);
        assert_eq!(settings.tunnel.max_attempts, 3);
        assert_eq!(settings.server.native_port, 8090);
        assert_eq!(settings.server.web_port, 19006);
    }

    #[test]
    #[serial]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let expod_dir = temp.path().join(".expod");
        std::fs::create_dir_all(&expod_dir).unwrap();
        std::fs::write(expod_dir.join("config.toml"), "not valid toml {{{{").unwrap();

        assert_eq!(load_settings(temp.path()), Settings::default());
    }

    #[test]
    #[serial]
    fn test_tunnel_timeout_env_override() {
        let temp = tempdir().unwrap();

        std::env::set_var(TUNNEL_TIMEOUT_ENV, "1500");
        let settings = load_settings(temp.path());
        std::env::set_var(TUNNEL_TIMEOUT_ENV, "soon");
        let invalid = load_settings(temp.path());
        std::env::remove_var(TUNNEL_TIMEOUT_ENV);

        assert_eq!(settings.tunnel.timeout_ms, 1500);
        assert_eq!(invalid.tunnel.timeout_ms, 10_000);
    }

    #[test]
    #[serial]
    fn test_init_config_dir_round_trips_defaults() {
        let temp = tempdir().unwrap();
        init_config_dir(temp.path()).unwrap();
        init_config_dir(temp.path()).unwrap();

        assert!(temp.path().join(".expod/config.toml").exists());
        assert_eq!(load_settings(temp.path()), Settings::default());
    }
}
