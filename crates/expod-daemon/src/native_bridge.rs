//! Port bridging for attached Android devices
//!
//! Before a tunnel starts, every attached Android device gets an
//! `adb reverse` mapping for the server port so USB-connected devices keep
//! reaching the dev server directly.

use std::sync::Mutex;

use async_trait::async_trait;
use expod_core::prelude::*;

use crate::adb;
use crate::ToolAvailability;

/// Makes a local port reachable from attached native devices
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NativeBridge: Send + Sync {
    /// Map `port` on every attached device. Failure is fatal for tunnel startup.
    async fn start_reverse(&self, port: u16) -> Result<()>;

    /// Remove mappings created by `start_reverse`
    async fn stop_reverse(&self, port: u16) -> Result<()>;
}

/// `adb reverse` for every online Android device
pub struct AdbReverseBridge {
    tools: ToolAvailability,
    reversed: Mutex<Vec<String>>,
}

impl AdbReverseBridge {
    pub fn new(tools: ToolAvailability) -> Self {
        Self {
            tools,
            reversed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl NativeBridge for AdbReverseBridge {
    async fn start_reverse(&self, port: u16) -> Result<()> {
        if self.tools.adb_path.is_none() {
            debug!("adb not available, skipping reverse for port {}", port);
            return Ok(());
        }

        let devices = adb::list_devices(&self.tools).await?;
        for device in devices.iter().filter(|d| d.is_online()) {
            adb::reverse_port(&self.tools, &device.serial, port).await?;
            self.reversed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(device.serial.clone());
        }
        Ok(())
    }

    async fn stop_reverse(&self, port: u16) -> Result<()> {
        let serials: Vec<String> =
            std::mem::take(&mut *self.reversed.lock().unwrap_or_else(|e| e.into_inner()));

        let mut failures = Vec::new();
        for serial in serials {
            if let Err(e) = adb::remove_reverse(&self.tools, &serial, port).await {
                failures.push(format!("{}: {}", serial, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_adb_is_success() {
        let bridge = AdbReverseBridge::new(ToolAvailability::default());
        bridge.start_reverse(8081).await.unwrap();
        bridge.stop_reverse(8081).await.unwrap();
    }
}
