//! One-time project checks run before starting a bundler that needs them

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use expod_core::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A check the project must pass before a bundler can start
#[async_trait]
pub trait ProjectPrerequisite: Send + Sync {
    /// Stable name; each name is asserted at most once per manager
    fn name(&self) -> &str;

    async fn assert(&self) -> Result<()>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
}

impl PackageJson {
    fn has(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }
}

/// Packages a project needs to bundle for the web
pub const WEB_PACKAGES: &[&str] = &["react-dom", "react-native-web"];

/// The project can be bundled for the web
#[derive(Debug, Clone)]
pub struct WebSupportPrerequisite {
    project_root: PathBuf,
}

impl WebSupportPrerequisite {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    /// Required packages missing from `package.json`
    pub fn missing_packages(&self) -> Result<Vec<&'static str>> {
        let path = self.project_root.join("package.json");
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::prerequisite(
                self.name(),
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        let package: PackageJson = serde_json::from_str(&content)?;
        Ok(WEB_PACKAGES
            .iter()
            .copied()
            .filter(|name| !package.has(name))
            .collect())
    }
}

#[async_trait]
impl ProjectPrerequisite for WebSupportPrerequisite {
    fn name(&self) -> &str {
        "web-support"
    }

    async fn assert(&self) -> Result<()> {
        let missing = self.missing_packages()?;
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::prerequisite(
            self.name(),
            format!(
                "web support requires {}. Install with: npx expo install {}",
                missing.join(", "),
                missing.join(" ")
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_package(dir: &Path, json: &str) {
        std::fs::write(dir.join("package.json"), json).unwrap();
    }

    #[tokio::test]
    async fn test_web_support_satisfied() {
        let temp = tempdir().unwrap();
        write_package(
            temp.path(),
            r#"{"dependencies":{"react-dom":"18.2.0"},"devDependencies":{"react-native-web":"~0.19"}}"#,
        );
        WebSupportPrerequisite::new(temp.path())
            .assert()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_web_support_lists_missing_packages() {
        let temp = tempdir().unwrap();
        write_package(temp.path(), r#"{"dependencies":{"react-dom":"18.2.0"}}"#);
        let prerequisite = WebSupportPrerequisite::new(temp.path());

        assert_eq!(
            prerequisite.missing_packages().unwrap(),
            vec!["react-native-web"]
        );
        let err = prerequisite.assert().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("react-native-web"));
    }

    #[tokio::test]
    async fn test_web_support_without_package_json() {
        let temp = tempdir().unwrap();
        let err = WebSupportPrerequisite::new(temp.path())
            .assert()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Prerequisite { .. }));
    }
}
