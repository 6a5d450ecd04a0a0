//! Android emulators and devices via adb

use async_trait::async_trait;
use expod_core::prelude::*;
use expod_core::RuntimeTarget;

use super::{select_device, LaunchOutcome, OpenOptions, PlatformManager};
use crate::adb::{self, AdbDevice};
use crate::ToolAvailability;

pub struct AndroidPlatformManager {
    tools: ToolAvailability,
}

impl AndroidPlatformManager {
    pub fn new(tools: ToolAvailability) -> Self {
        Self { tools }
    }

    /// An online device, booting an AVD when none is attached
    async fn resolve_device(&self, options: &OpenOptions) -> Result<Option<AdbDevice>> {
        let devices: Vec<AdbDevice> = adb::list_devices(&self.tools)
            .await?
            .into_iter()
            .filter(AdbDevice::is_online)
            .collect();

        if !devices.is_empty() {
            let names = |d: &AdbDevice| {
                let mut names = vec![d.display_name(), d.serial.clone()];
                names.extend(d.model.clone());
                names
            };
            return Ok(select_device("android", &devices, names, options)
                .await?
                .cloned());
        }

        let avds = adb::list_avds(&self.tools).await?;
        if avds.is_empty() {
            return Err(Error::platform(
                "android",
                "No Android devices attached and no emulators configured",
            ));
        }

        let avd = select_device("android", &avds, |name: &String| vec![name.clone()], options)
            .await?
            .cloned();
        match avd {
            Some(avd) => Ok(Some(adb::boot_avd(&self.tools, &avd).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PlatformManager for AndroidPlatformManager {
    fn runtime(&self) -> RuntimeTarget {
        RuntimeTarget::Emulator
    }

    async fn open(&self, url: &str, options: &OpenOptions) -> Result<LaunchOutcome> {
        if let Some(message) = self.tools.android_unavailable_message() {
            return Err(Error::platform("android", message));
        }

        let Some(device) = self.resolve_device(options).await? else {
            return Ok(LaunchOutcome::Aborted);
        };

        adb::open_url(&self.tools, &device.serial, url).await?;
        Ok(LaunchOutcome::Opened {
            url: url.to_string(),
            device: device.display_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_without_sdk() {
        let manager = AndroidPlatformManager::new(ToolAvailability::default());
        assert_eq!(manager.runtime(), RuntimeTarget::Emulator);

        let err = manager
            .open("exp://127.0.0.1:8081", &OpenOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Platform { .. }));
        assert!(err.to_string().contains("Android SDK not found"));
    }
}
