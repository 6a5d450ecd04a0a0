//! Platform managers: launch a URL on a simulator, emulator or browser
//!
//! A manager owns device discovery and app launch for one runtime. It is
//! handed the URL to open; deciding which URL belongs to the dev server.
//! A user cancelling a device pick is the [`LaunchOutcome::Aborted`] variant,
//! not an error.

pub mod android;
pub mod browser;
pub mod ios;

use async_trait::async_trait;
use expod_core::prelude::*;
use expod_core::RuntimeTarget;

use crate::prompt::{pick_device, PickResult};

pub use android::AndroidPlatformManager;
pub use browser::BrowserPlatformManager;
pub use ios::IosPlatformManager;

/// Options for one launch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Ask the user to pick when several devices are available
    pub should_prompt: bool,
    /// Device name, serial or UDID to launch on
    pub device: Option<String>,
}

/// Result of a launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The URL was opened on `device`
    Opened { url: String, device: String },
    /// The user cancelled before anything was launched
    Aborted,
}

impl LaunchOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, LaunchOutcome::Aborted)
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            LaunchOutcome::Opened { url, .. } => Some(url),
            LaunchOutcome::Aborted => None,
        }
    }
}

/// Launches URLs on one runtime target
#[async_trait]
pub trait PlatformManager: Send + Sync {
    fn runtime(&self) -> RuntimeTarget;

    /// Pick a device, make sure it is running and open `url` on it
    async fn open(&self, url: &str, options: &OpenOptions) -> Result<LaunchOutcome>;
}

/// Choose a device from `items`.
///
/// `Ok(None)` means the user cancelled the pick.
pub(crate) async fn select_device<'a, T>(
    platform: &str,
    items: &'a [T],
    name_of: impl Fn(&T) -> Vec<String>,
    options: &OpenOptions,
) -> Result<Option<&'a T>> {
    if let Some(wanted) = &options.device {
        return items
            .iter()
            .find(|item| name_of(item).iter().any(|name| name == wanted))
            .map(Some)
            .ok_or_else(|| Error::platform(platform, format!("No device named \"{}\"", wanted)));
    }

    if options.should_prompt && items.len() > 1 {
        let choices = items
            .iter()
            .map(|item| name_of(item).into_iter().next().unwrap_or_default())
            .collect();
        return match pick_device(&format!("Select a {} device", platform), choices).await? {
            PickResult::Selected(index) => Ok(items.get(index)),
            PickResult::Cancelled => Ok(None),
        };
    }

    Ok(items.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(item: &(&str, &str)) -> Vec<String> {
        vec![item.0.to_string(), item.1.to_string()]
    }

    static DEVICES: [(&str, &str); 2] = [("Pixel 6", "emulator-5554"), ("Pixel 8", "R58M")];

    #[tokio::test]
    async fn test_select_first_without_prompt() {
        let chosen = select_device("android", &DEVICES, names, &OpenOptions::default())
            .await
            .unwrap();
        assert_eq!(chosen, Some(&DEVICES[0]));
    }

    #[tokio::test]
    async fn test_select_by_serial() {
        let options = OpenOptions {
            device: Some("R58M".to_string()),
            ..Default::default()
        };
        let chosen = select_device("android", &DEVICES, names, &options)
            .await
            .unwrap();
        assert_eq!(chosen, Some(&DEVICES[1]));
    }

    #[tokio::test]
    async fn test_select_unknown_device() {
        let options = OpenOptions {
            device: Some("iPad".to_string()),
            ..Default::default()
        };
        let err = select_device("ios", &DEVICES, names, &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No device named \"iPad\""));
    }

    #[tokio::test]
    async fn test_single_device_skips_prompt() {
        let options = OpenOptions {
            should_prompt: true,
            ..Default::default()
        };
        let chosen = select_device("android", &DEVICES[..1], names, &options)
            .await
            .unwrap();
        assert_eq!(chosen, Some(&DEVICES[0]));
    }

    #[test]
    fn test_launch_outcome_helpers() {
        let opened = LaunchOutcome::Opened {
            url: "exp://127.0.0.1:8081".to_string(),
            device: "Pixel 6".to_string(),
        };
        assert_eq!(opened.url(), Some("exp://127.0.0.1:8081"));
        assert!(!opened.is_aborted());
        assert!(LaunchOutcome::Aborted.is_aborted());
        assert_eq!(LaunchOutcome::Aborted.url(), None);
    }
}
