//! Desktop browser

use async_trait::async_trait;
use expod_core::prelude::*;
use expod_core::RuntimeTarget;

use super::{LaunchOutcome, OpenOptions, PlatformManager};

#[derive(Debug, Default)]
pub struct BrowserPlatformManager;

#[async_trait]
impl PlatformManager for BrowserPlatformManager {
    fn runtime(&self) -> RuntimeTarget {
        RuntimeTarget::Desktop
    }

    async fn open(&self, url: &str, _options: &OpenOptions) -> Result<LaunchOutcome> {
        let target = url.to_string();
        tokio::task::spawn_blocking(move || open::that(&target))
            .await
            .map_err(|e| Error::process(format!("Browser launch task failed: {}", e)))?
            .map_err(|e| Error::platform("web", format!("Failed to open browser: {}", e)))?;

        info!("Opened {} in the default browser", url);
        Ok(LaunchOutcome::Opened {
            url: url.to_string(),
            device: "browser".to_string(),
        })
    }
}
