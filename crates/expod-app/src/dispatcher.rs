//! Opening the app on the platforms the user asked for

use expod_core::prelude::*;
use expod_core::{Platform, RuntimeTarget};
use expod_daemon::{LaunchOutcome, OpenOptions};

use crate::manager::DevServerManager;

/// Platforms to open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformSelection {
    pub android: bool,
    pub ios: bool,
    pub web: bool,
}

impl PlatformSelection {
    pub fn is_empty(&self) -> bool {
        !(self.android || self.ios || self.web)
    }

    /// Native platforms first, web last
    pub fn ordered(&self) -> Vec<Platform> {
        [
            (self.android, Platform::Android),
            (self.ios, Platform::Ios),
            (self.web, Platform::Web),
        ]
        .into_iter()
        .filter_map(|(wanted, platform)| wanted.then_some(platform))
        .collect()
    }
}

/// How a dispatch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformsOpened {
    /// Every requested platform opened; `native` is true if one was native
    Opened { native: bool },
    /// The user cancelled on `platform`; later platforms were not tried
    Aborted { platform: Platform },
}

impl PlatformsOpened {
    pub fn opened_native(&self) -> bool {
        matches!(self, PlatformsOpened::Opened { native: true })
    }
}

/// Open each selected platform in order.
///
/// Native platforms use the default dev server; web lazily starts the web
/// server. The first failure or cancellation stops the dispatch, and
/// platforms that already opened stay open.
pub async fn open_platforms(
    manager: &DevServerManager,
    selection: PlatformSelection,
    options: &OpenOptions,
) -> Result<PlatformsOpened> {
    let mut native = false;

    for platform in selection.ordered() {
        let runtime = platform.runtime();
        let server = if runtime == RuntimeTarget::Desktop {
            manager.ensure_web_dev_server_running().await?
        } else {
            manager
                .default_dev_server()
                .ok_or_else(|| Error::not_running("open_platforms"))?
        };

        match server.open_platform(runtime, options).await? {
            LaunchOutcome::Opened { url, device } => {
                info!("Opened {} on {}", url, device);
                native |= runtime.is_native();
            }
            LaunchOutcome::Aborted => {
                debug!("Opening {} was cancelled, skipping remaining platforms", platform);
                return Ok(PlatformsOpened::Aborted { platform });
            }
        }
    }

    Ok(PlatformsOpened::Opened { native })
}
