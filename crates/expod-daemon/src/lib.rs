//! # expod-daemon - Tunnels, Devices and Native Tools
//!
//! Drives the external processes a dev server depends on: the tunnel agent,
//! `adb`, `emulator` and `xcrun simctl`, and the desktop browser.
//!
//! Depends on [`expod_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Tunnels
//! - [`TunnelConnector`] - Connect/stop state machine with bounded retries
//! - [`TunnelProvider`], [`NgrokProvider`] - The external tunnel agent
//! - [`KeyValueStore`], [`MemoryStore`] - Storage for the hostname randomness seed
//!
//! ### Native Bridge
//! - [`NativeBridge`], [`AdbReverseBridge`] - `adb reverse` before a tunnel starts
//!
//! ### Platform Launch
//! - [`PlatformManager`] - Open a URL on one runtime target
//! - [`AndroidPlatformManager`], [`IosPlatformManager`], [`BrowserPlatformManager`]
//! - [`LaunchOutcome`] - Opened, or aborted by the user
//!
//! ### Platform Utilities
//! - [`ToolAvailability`] - Check for Android SDK, iOS tools and the tunnel agent

pub mod adb;
pub mod native_bridge;
pub mod platforms;
pub mod prompt;
pub mod simctl;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;
pub mod tunnel;

pub use adb::AdbDevice;
pub use native_bridge::{AdbReverseBridge, NativeBridge};
pub use platforms::{
    AndroidPlatformManager, BrowserPlatformManager, IosPlatformManager, LaunchOutcome,
    OpenOptions, PlatformManager,
};
pub use prompt::PickResult;
pub use simctl::{Simulator, SimulatorState};
pub use tool_availability::ToolAvailability;
pub use tunnel::{
    CollisionPredicate, ConnectOptions, KeyValueStore, MemoryStore, NgrokProvider, TunnelConfig,
    TunnelConnector, TunnelProvider, TunnelRequest, TunnelSession, TunnelState,
    URL_RANDOMNESS_KEY,
};
