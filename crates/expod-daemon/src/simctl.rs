//! iOS simulator control via `xcrun simctl`

use std::collections::HashMap;
use std::time::Duration;

use expod_core::prelude::*;
use serde::Deserialize;
use tokio::process::Command;

/// How long to wait for `simctl boot` to report the device as booted
const BOOT_TIMEOUT: Duration = Duration::from_secs(60);

const BOOT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// An iOS simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulator {
    pub udid: String,
    pub name: String,
    /// Friendly runtime, e.g. "iOS 17.2"
    pub runtime: String,
    pub state: SimulatorState,
}

impl Simulator {
    pub fn is_booted(&self) -> bool {
        self.state == SimulatorState::Booted
    }

    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.runtime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Shutdown,
    Booted,
    Booting,
    Unknown,
}

impl From<&str> for SimulatorState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "shutdown" => SimulatorState::Shutdown,
            "booted" => SimulatorState::Booted,
            "booting" => SimulatorState::Booting,
            _ => SimulatorState::Unknown,
        }
    }
}

/// JSON output from `xcrun simctl list devices -j`
#[derive(Debug, Deserialize)]
struct SimctlOutput {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Deserialize)]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
    #[serde(rename = "isAvailable")]
    is_available: Option<bool>,
}

async fn simctl(args: &[&str]) -> Result<std::process::Output> {
    Command::new("xcrun")
        .arg("simctl")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::process(format!("Failed to run xcrun simctl: {}", e)))
}

/// List available iOS simulators, booted first, newest runtime first
pub async fn list_simulators() -> Result<Vec<Simulator>> {
    let output = simctl(&["list", "devices", "-j"]).await?;
    if !output.status.success() {
        return Err(Error::process("xcrun simctl list returned an error"));
    }
    parse_simulators(&String::from_utf8_lossy(&output.stdout))
}

fn parse_simulators(json: &str) -> Result<Vec<Simulator>> {
    let parsed: SimctlOutput = serde_json::from_str(json)?;

    let mut simulators: Vec<Simulator> = parsed
        .devices
        .into_iter()
        .filter(|(runtime_key, _)| runtime_key.contains("iOS"))
        .flat_map(|(runtime_key, devices)| {
            let runtime = parse_runtime_name(&runtime_key);
            devices
                .into_iter()
                .filter(|d| d.is_available != Some(false))
                .map(move |d| Simulator {
                    udid: d.udid,
                    name: d.name,
                    runtime: runtime.clone(),
                    state: SimulatorState::from(d.state.as_str()),
                })
        })
        .collect();

    simulators.sort_by(|a, b| {
        b.is_booted()
            .cmp(&a.is_booted())
            .then_with(|| b.runtime.cmp(&a.runtime))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(simulators)
}

/// "com.apple.CoreSimulator.SimRuntime.iOS-17-2" -> "iOS 17.2"
fn parse_runtime_name(identifier: &str) -> String {
    match identifier.strip_prefix("com.apple.CoreSimulator.SimRuntime.") {
        Some(suffix) => match suffix.split_once('-') {
            Some((os, version)) => format!("{} {}", os, version.replace('-', ".")),
            None => suffix.to_string(),
        },
        None => identifier.to_string(),
    }
}

/// Boot a simulator and bring Simulator.app to the front
pub async fn boot(udid: &str) -> Result<()> {
    let output = simctl(&["boot", udid]).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // "Unable to boot device in current state: Booted" is fine
        if !stderr.contains("Booted") {
            return Err(Error::platform(
                "ios",
                format!("Failed to boot simulator: {}", stderr.trim()),
            ));
        }
    }

    let started = tokio::time::Instant::now();
    loop {
        let booted = list_simulators()
            .await?
            .iter()
            .any(|s| s.udid == udid && s.is_booted());
        if booted {
            break;
        }
        if started.elapsed() > BOOT_TIMEOUT {
            return Err(Error::platform("ios", "Simulator boot timed out"));
        }
        tokio::time::sleep(BOOT_POLL_INTERVAL).await;
    }

    let _ = Command::new("open").args(["-a", "Simulator"]).output().await;
    Ok(())
}

/// Open `url` in a booted simulator
pub async fn open_url(udid: &str, url: &str) -> Result<()> {
    let output = simctl(&["openurl", udid, url]).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::platform(
            "ios",
            format!("Failed to open {}: {}", url, stderr.trim()),
        ));
    }
    info!("Opened {} on simulator {}", url, udid);
    Ok(())
}
