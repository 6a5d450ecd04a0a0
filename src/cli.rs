//! Command-line interface for `expod start`

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use expod_app::PlatformSelection;
use expod_core::prelude::*;
use expod_core::{BundlerStartOptions, HostType, LocationOptions, Mode};

/// expod - Development server orchestration for Expo projects
#[derive(Parser, Debug)]
#[command(name = "expod")]
#[command(version, about = "Development server orchestration for Expo projects", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the dev server
    Start(StartArgs),
}

/// Flags of `expod start`
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct StartArgs {
    /// Path to the project (defaults to the current directory)
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// How devices reach the server
    #[arg(long, value_name = "lan|tunnel|localhost")]
    pub host: Option<String>,

    /// Same as --host tunnel
    #[arg(long)]
    pub tunnel: bool,

    /// Same as --host lan
    #[arg(long)]
    pub lan: bool,

    /// Same as --host localhost
    #[arg(long)]
    pub localhost: bool,

    /// Skip network requests and use the LAN host
    #[arg(long)]
    pub offline: bool,

    /// Port for the native dev server
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Ask for HTTPS (served as HTTP)
    #[arg(long)]
    pub https: bool,

    /// Custom URI scheme for dev-client deep links
    #[arg(long)]
    pub scheme: Option<String>,

    /// Open in a development build
    #[arg(long, short = 'd')]
    pub dev_client: bool,

    /// Open in Expo Go
    #[arg(long, short = 'g')]
    pub go: bool,

    /// Clear the bundler cache
    #[arg(long, short = 'c')]
    pub clear: bool,

    /// Maximum number of bundler workers
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// Bundle in production mode
    #[arg(long)]
    pub no_dev: bool,

    /// Minify bundles
    #[arg(long)]
    pub minify: bool,

    /// Open on a connected Android device or emulator
    #[arg(long, short = 'a')]
    pub android: bool,

    /// Open in an iOS simulator
    #[arg(long, short = 'i')]
    pub ios: bool,

    /// Open in a web browser
    #[arg(long, short = 'w')]
    pub web: bool,
}

/// Validated `start` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPlan {
    pub project_root: PathBuf,
    pub options: BundlerStartOptions,
    pub platforms: PlatformSelection,
    pub offline: bool,
}

impl StartArgs {
    /// The host type the flags ask for.
    ///
    /// At most one of `--offline`, `--host`, `--tunnel`, `--lan`,
    /// `--localhost` may be given. `--offline` on its own means LAN.
    pub fn host_type(&self) -> Result<HostType> {
        let mut chosen: Vec<(&str, HostType)> = Vec::new();
        if self.offline {
            chosen.push(("--offline", HostType::Lan));
        }
        if let Some(host) = &self.host {
            chosen.push(("--host", host.parse()?));
        }
        for (flag, set, host_type) in [
            ("--tunnel", self.tunnel, HostType::Tunnel),
            ("--lan", self.lan, HostType::Lan),
            ("--localhost", self.localhost, HostType::Localhost),
        ] {
            if set {
                chosen.push((flag, host_type));
            }
        }

        if chosen.len() > 1 {
            let flags: Vec<&str> = chosen.iter().map(|(flag, _)| *flag).collect();
            return Err(Error::usage(format!(
                "Specify at most one of: --offline, --host, --tunnel, --lan, --localhost (got {})",
                flags.join(", ")
            )));
        }

        Ok(chosen.first().map(|(_, h)| *h).unwrap_or_default())
    }

    /// Check flag combinations and build the start plan. Binds nothing.
    pub fn plan(&self) -> Result<StartPlan> {
        let host_type = self.host_type()?;

        if self.dev_client && self.go {
            return Err(Error::usage(
                "--dev-client and --go cannot be used together",
            ));
        }
        if self.port == Some(0) {
            return Err(Error::usage("--port must be between 1 and 65535"));
        }
        if self.max_workers == Some(0) {
            return Err(Error::usage("--max-workers must be at least 1"));
        }

        let project_root = match &self.path {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };

        Ok(StartPlan {
            project_root,
            options: BundlerStartOptions {
                mode: if self.no_dev {
                    Mode::Production
                } else {
                    Mode::Development
                },
                dev_client: self.dev_client,
                https: self.https,
                max_workers: self.max_workers,
                minify: self.minify,
                reset_cache: self.clear,
                location: LocationOptions {
                    host_type,
                    scheme: self.scheme.clone(),
                },
                port: self.port,
            },
            platforms: PlatformSelection {
                android: self.android,
                ios: self.ios,
                web: self.web,
            },
            offline: self.offline,
        })
    }
}
