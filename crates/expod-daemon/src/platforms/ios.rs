//! iOS simulators via simctl

use async_trait::async_trait;
use expod_core::prelude::*;
use expod_core::RuntimeTarget;

use super::{select_device, LaunchOutcome, OpenOptions, PlatformManager};
use crate::simctl::{self, Simulator};
use crate::ToolAvailability;

pub struct IosPlatformManager {
    tools: ToolAvailability,
}

impl IosPlatformManager {
    pub fn new(tools: ToolAvailability) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl PlatformManager for IosPlatformManager {
    fn runtime(&self) -> RuntimeTarget {
        RuntimeTarget::Simulator
    }

    async fn open(&self, url: &str, options: &OpenOptions) -> Result<LaunchOutcome> {
        if let Some(message) = self.tools.ios_unavailable_message() {
            return Err(Error::platform("ios", message));
        }

        let simulators = simctl::list_simulators().await?;
        if simulators.is_empty() {
            return Err(Error::platform("ios", "No iOS simulators available"));
        }

        let names = |s: &Simulator| vec![s.display_name(), s.name.clone(), s.udid.clone()];
        let Some(simulator) = select_device("ios", &simulators, names, options).await? else {
            return Ok(LaunchOutcome::Aborted);
        };

        if !simulator.is_booted() {
            info!("Booting {}", simulator.display_name());
            simctl::boot(&simulator.udid).await?;
        }
        simctl::open_url(&simulator.udid, url).await?;

        Ok(LaunchOutcome::Opened {
            url: url.to_string(),
            device: simulator.display_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_without_simctl() {
        let manager = IosPlatformManager::new(ToolAvailability::default());
        assert_eq!(manager.runtime(), RuntimeTarget::Simulator);

        let err = manager
            .open("exp://127.0.0.1:8081", &OpenOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Platform { ref platform, .. } if platform == "ios"));
    }
}
