//! Tool availability checking for device management and tunnels
//!
//! This module locates the external tools `start` drives: `adb` and `emulator`
//! (Android SDK), `xcrun simctl` (iOS) and the tunnel provider binary.

use std::path::PathBuf;

/// Cached availability of external tools
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Whether `xcrun simctl` is available (macOS with Xcode)
    pub xcrun_simctl: bool,

    /// Path to `adb` if found
    pub adb_path: Option<PathBuf>,

    /// Path to `emulator` if found
    pub emulator_path: Option<PathBuf>,

    /// Path to the tunnel provider binary if found
    pub tunnel_binary: Option<PathBuf>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub async fn check(tunnel_binary: &str) -> Self {
        let xcrun_simctl = Self::check_xcrun_simctl().await;
        let adb_path = Self::find_android_tool("adb", "platform-tools");
        let emulator_path = Self::find_android_tool("emulator", "emulator");
        let tunnel_binary = which::which(tunnel_binary).ok();

        tracing::debug!(
            "Tool availability: simctl={} adb={:?} emulator={:?} tunnel={:?}",
            xcrun_simctl,
            adb_path,
            emulator_path,
            tunnel_binary
        );

        Self {
            xcrun_simctl,
            adb_path,
            emulator_path,
            tunnel_binary,
        }
    }

    /// Check if xcrun simctl is available
    async fn check_xcrun_simctl() -> bool {
        // Only available on macOS
        #[cfg(not(target_os = "macos"))]
        return false;

        #[cfg(target_os = "macos")]
        {
            use std::process::Stdio;
            use tokio::process::Command;

            Command::new("xcrun")
                .args(["simctl", "help"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| tracing::debug!("xcrun simctl check failed: {}", e))
                .unwrap_or(false)
        }
    }

    /// Find an Android SDK tool on PATH or under the SDK directories
    fn find_android_tool(name: &str, sdk_subdir: &str) -> Option<PathBuf> {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }

        Self::sdk_roots()
            .into_iter()
            .map(|root| root.join(sdk_subdir).join(name))
            .find(|candidate| candidate.is_file())
    }

    /// SDK roots from `ANDROID_HOME` and `ANDROID_SDK_ROOT`
    fn sdk_roots() -> Vec<PathBuf> {
        ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Get user-friendly message for unavailable iOS tools
    pub fn ios_unavailable_message(&self) -> Option<&'static str> {
        if self.xcrun_simctl {
            None
        } else {
            #[cfg(target_os = "macos")]
            {
                Some("Xcode not installed. Install Xcode to use iOS simulators.")
            }

            #[cfg(not(target_os = "macos"))]
            {
                Some("iOS simulators are only available on macOS.")
            }
        }
    }

    /// Get user-friendly message for unavailable Android tools
    pub fn android_unavailable_message(&self) -> Option<&'static str> {
        if self.adb_path.is_some() {
            None
        } else {
            Some("Android SDK not found. Set ANDROID_HOME or install Android Studio.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tool_availability_default() {
        let availability = ToolAvailability::default();
        assert!(!availability.xcrun_simctl);
        assert!(availability.adb_path.is_none());
        assert!(availability.emulator_path.is_none());
        assert!(availability.tunnel_binary.is_none());
    }

    #[test]
    fn test_unavailable_messages() {
        let availability = ToolAvailability::default();
        assert!(availability.ios_unavailable_message().is_some());
        assert!(availability.android_unavailable_message().is_some());
    }

    #[test]
    fn test_android_available_no_message() {
        let availability = ToolAvailability {
            adb_path: Some(PathBuf::from("/sdk/platform-tools/adb")),
            ..Default::default()
        };
        assert!(availability.android_unavailable_message().is_none());
    }

    #[test]
    #[serial]
    fn test_sdk_roots_from_env() {
        std::env::set_var("ANDROID_HOME", "/test/android");
        std::env::set_var("ANDROID_SDK_ROOT", "/test/sdk");
        let roots = ToolAvailability::sdk_roots();
        assert!(roots.contains(&PathBuf::from("/test/android")));
        assert!(roots.contains(&PathBuf::from("/test/sdk")));
        std::env::remove_var("ANDROID_HOME");
        std::env::remove_var("ANDROID_SDK_ROOT");
    }

    #[test]
    #[serial]
    fn test_find_android_tool_under_sdk_root() {
        let dir = std::env::temp_dir().join(format!("expod-sdk-{}", std::process::id()));
        let tools = dir.join("platform-tools");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::write(tools.join("adb-fake-tool"), "").unwrap();

        std::env::set_var("ANDROID_HOME", &dir);
        let found = ToolAvailability::find_android_tool("adb-fake-tool", "platform-tools");
        std::env::remove_var("ANDROID_HOME");
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(found, Some(tools.join("adb-fake-tool")));
    }
}
