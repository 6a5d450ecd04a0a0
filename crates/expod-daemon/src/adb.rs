//! Android Debug Bridge and AVD helpers
//!
//! Wraps the `adb` and `emulator` commands from the Android SDK: listing
//! attached devices, port reversal, opening URLs and booting AVDs.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use expod_core::prelude::*;
use regex::Regex;
use tokio::process::Command;
use tokio::time::{sleep, Duration, Instant};

use crate::ToolAvailability;

/// Delay between polls while waiting for a booted emulator to attach
const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait for a freshly booted emulator to show up in `adb devices`
const EMULATOR_BOOT_TIMEOUT: Duration = Duration::from_secs(90);

static MODEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bmodel:(\S+)").expect("Invalid model pattern regex"));

/// A device attached to adb
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDevice {
    /// Serial used with `adb -s`
    pub serial: String,
    /// adb state: "device", "offline", "unauthorized", ...
    pub state: String,
    /// Model name reported with `-l`
    pub model: Option<String>,
}

impl AdbDevice {
    /// Whether adb can run commands against this device
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }

    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }

    pub fn display_name(&self) -> String {
        match &self.model {
            Some(model) => format!("{} ({})", model.replace('_', " "), self.serial),
            None => self.serial.clone(),
        }
    }
}

fn adb_program(tools: &ToolAvailability) -> Result<&Path> {
    tools
        .adb_path
        .as_deref()
        .ok_or_else(|| Error::platform("android", "adb not found. Set ANDROID_HOME or install Android Studio."))
}

/// List devices attached to adb
pub async fn list_devices(tools: &ToolAvailability) -> Result<Vec<AdbDevice>> {
    let adb = adb_program(tools)?;
    let output = Command::new(adb)
        .args(["devices", "-l"])
        .output()
        .await
        .map_err(|e| Error::process(format!("Failed to run adb: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::process(format!("adb devices failed: {}", stderr.trim())));
    }

    Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse the output of `adb devices -l`
///
/// Format:
/// ```text
/// List of devices attached
/// emulator-5554  device product:sdk_gphone64 model:sdk_gphone64_x86_64 device:emu64x transport_id:1
/// ```
fn parse_devices(output: &str) -> Vec<AdbDevice> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?.to_string();
            let state = parts.next()?.to_string();
            let model = MODEL_PATTERN
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string());
            Some(AdbDevice {
                serial,
                state,
                model,
            })
        })
        .collect()
}

/// Map `port` on the device to `port` on this machine
pub async fn reverse_port(tools: &ToolAvailability, serial: &str, port: u16) -> Result<()> {
    let adb = adb_program(tools)?;
    let mapping = format!("tcp:{}", port);
    let output = Command::new(adb)
        .args(["-s", serial, "reverse", &mapping, &mapping])
        .output()
        .await
        .map_err(|e| Error::process(format!("Failed to run adb reverse: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::native_bridge(format!(
            "adb reverse failed for device {}: {}",
            serial,
            stderr.trim()
        )));
    }

    debug!("adb reverse {} on {}", mapping, serial);
    Ok(())
}

/// Remove a reverse mapping created by [`reverse_port`]
pub async fn remove_reverse(tools: &ToolAvailability, serial: &str, port: u16) -> Result<()> {
    let adb = adb_program(tools)?;
    let output = Command::new(adb)
        .args(["-s", serial, "reverse", "--remove", &format!("tcp:{}", port)])
        .output()
        .await
        .map_err(|e| Error::process(format!("Failed to run adb reverse --remove: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::process(format!(
            "adb reverse --remove failed for {}: {}",
            serial,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Open `url` on the device with a VIEW intent
pub async fn open_url(tools: &ToolAvailability, serial: &str, url: &str) -> Result<()> {
    let adb = adb_program(tools)?;
    let output = Command::new(adb)
        .args([
            "-s",
            serial,
            "shell",
            "am",
            "start",
            "-a",
            "android.intent.action.VIEW",
            "-d",
            url,
        ])
        .output()
        .await
        .map_err(|e| Error::process(format!("Failed to run adb shell am start: {}", e)))?;

    // `am start` reports failures on stdout with a zero exit code
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() || stdout.contains("Error:") {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::platform(
            "android",
            format!("Failed to open {} on {}: {}{}", url, serial, stdout.trim(), stderr.trim()),
        ));
    }

    info!("Opened {} on {}", url, serial);
    Ok(())
}

/// List AVD names via `emulator -list-avds`
pub async fn list_avds(tools: &ToolAvailability) -> Result<Vec<String>> {
    let emulator = emulator_program(tools)?;
    let output = Command::new(emulator)
        .arg("-list-avds")
        .output()
        .await
        .map_err(|e| Error::process(format!("Failed to run emulator: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::process(format!(
            "emulator -list-avds failed: {}",
            stderr
        )));
    }

    Ok(parse_avd_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Output format is one AVD name per line, possibly with log noise prefixed by "INFO"
fn parse_avd_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("INFO"))
        .map(str::to_string)
        .collect()
}

fn emulator_program(tools: &ToolAvailability) -> Result<PathBuf> {
    tools
        .emulator_path
        .clone()
        .ok_or_else(|| Error::platform("android", "Android emulator not available"))
}

/// Boot an AVD and wait until it is attached to adb
pub async fn boot_avd(tools: &ToolAvailability, avd_name: &str) -> Result<AdbDevice> {
    let emulator = emulator_program(tools)?;
    let before: Vec<String> = list_devices(tools)
        .await?
        .into_iter()
        .map(|d| d.serial)
        .collect();

    info!("Booting Android emulator {}", avd_name);
    let mut child = Command::new(&emulator)
        .args(["-avd", avd_name])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| Error::ProcessSpawn {
            program: emulator.display().to_string(),
            reason: e.to_string(),
        })?;

    // The emulator outlives this call
    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    let deadline = Instant::now() + EMULATOR_BOOT_TIMEOUT;
    while Instant::now() < deadline {
        sleep(DEVICE_POLL_INTERVAL).await;
        let devices = list_devices(tools).await?;
        if let Some(device) = devices
            .into_iter()
            .find(|d| d.is_online() && d.is_emulator() && !before.contains(&d.serial))
        {
            return Ok(device);
        }
    }

    Err(Error::platform(
        "android",
        format!("Emulator {} did not come online in time", avd_name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        let output = "List of devices attached\n\
            emulator-5554          device product:sdk_gphone64_x86_64 model:sdk_gphone64_x86_64 device:emu64x transport_id:1\n\
            R58M123ABC             unauthorized usb:1-1 transport_id:2\n\n";
        let devices = parse_devices(output);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert!(devices[0].is_online());
        assert!(devices[0].is_emulator());
        assert_eq!(devices[0].model.as_deref(), Some("sdk_gphone64_x86_64"));
        assert_eq!(devices[1].state, "unauthorized");
        assert!(!devices[1].is_online());
        assert!(devices[1].model.is_none());
    }

    #[test]
    fn test_parse_devices_skips_daemon_banner() {
        let output = "* daemon not running; starting now at tcp:5037\n\
            * daemon started successfully\n\
            List of devices attached\n";
        assert!(parse_devices(output).is_empty());
    }

    #[test]
    fn test_display_name() {
        let device = AdbDevice {
            serial: "emulator-5554".to_string(),
            state: "device".to_string(),
            model: Some("Pixel_6".to_string()),
        };
        assert_eq!(device.display_name(), "Pixel 6 (emulator-5554)");
    }

    #[test]
    fn test_parse_avd_list() {
        let output = "INFO    | Storing crashdata in: /tmp/android\nPixel_6_API_33\n\n  Nexus_5X_API_29  \n";
        let avds = parse_avd_list(output);
        assert_eq!(avds, vec!["Pixel_6_API_33", "Nexus_5X_API_29"]);
    }

    #[tokio::test]
    async fn test_list_devices_without_adb() {
        let err = list_devices(&ToolAvailability::default()).await.unwrap_err();
        assert!(err.to_string().contains("adb not found"));
    }
}
