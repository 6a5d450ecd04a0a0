//! TypeScript bootstrap: give TypeScript projects a default `tsconfig.json`

use std::path::{Path, PathBuf};

use expod_core::prelude::*;
use serde_json::json;

/// Directories never scanned for sources
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", ".expo", ".expod", "ios", "android"];

/// How deep to look for `.ts`/`.tsx` files
const MAX_SCAN_DEPTH: usize = 4;

/// What the bootstrap did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeScriptSetup {
    /// No TypeScript sources
    NotTypeScript,
    /// A `tsconfig.json` already exists
    AlreadyConfigured,
    /// Wrote a default `tsconfig.json` at this path
    Created(PathBuf),
}

fn is_typescript_file(path: &Path) -> bool {
    let is_ts = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ts") | Some("tsx")
    );
    is_ts && !path.to_string_lossy().ends_with(".d.ts")
}

fn contains_typescript(dir: &Path, depth: usize) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        if path.is_dir() {
            let skip = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| IGNORED_DIRS.contains(&name));
            !skip && depth < MAX_SCAN_DEPTH && contains_typescript(&path, depth + 1)
        } else {
            is_typescript_file(&path)
        }
    })
}

/// Write `tsconfig.json` when the project has TypeScript sources but no config
pub async fn bootstrap_typescript(project_root: &Path) -> Result<TypeScriptSetup> {
    let root = project_root.to_path_buf();
    tokio::task::spawn_blocking(move || bootstrap_blocking(&root))
        .await
        .map_err(|e| Error::config(format!("TypeScript bootstrap task failed: {}", e)))?
}

fn bootstrap_blocking(root: &Path) -> Result<TypeScriptSetup> {
    let tsconfig = root.join("tsconfig.json");
    if tsconfig.exists() {
        return Ok(TypeScriptSetup::AlreadyConfigured);
    }
    if !contains_typescript(root, 0) {
        return Ok(TypeScriptSetup::NotTypeScript);
    }

    let content = serde_json::to_string_pretty(&json!({
        "extends": "expo/tsconfig.base",
        "compilerOptions": {},
    }))?;
    std::fs::write(&tsconfig, format!("{}\n", content))?;
    info!("Created {}", tsconfig.display());
    Ok(TypeScriptSetup::Created(tsconfig))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_creates_tsconfig_for_typescript_project() {
        let temp = tempdir().unwrap();
        std::fs::create_dir(temp.path().join("app")).unwrap();
        std::fs::write(temp.path().join("app/index.tsx"), "export {}").unwrap();

        let setup = bootstrap_typescript(temp.path()).await.unwrap();
        let path = temp.path().join("tsconfig.json");
        assert_eq!(setup, TypeScriptSetup::Created(path.clone()));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["extends"], "expo/tsconfig.base");
    }

    #[tokio::test]
    async fn test_existing_tsconfig_is_kept() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("App.ts"), "").unwrap();
        std::fs::write(temp.path().join("tsconfig.json"), "{\"strict\":true}").unwrap();

        let setup = bootstrap_typescript(temp.path()).await.unwrap();
        assert_eq!(setup, TypeScriptSetup::AlreadyConfigured);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("tsconfig.json")).unwrap(),
            "{\"strict\":true}"
        );
    }

    #[tokio::test]
    async fn test_javascript_project_untouched() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("App.js"), "").unwrap();
        std::fs::create_dir(temp.path().join("node_modules")).unwrap();
        std::fs::write(temp.path().join("node_modules/types.ts"), "").unwrap();
        std::fs::write(temp.path().join("env.d.ts"), "").unwrap();

        let setup = bootstrap_typescript(temp.path()).await.unwrap();
        assert_eq!(setup, TypeScriptSetup::NotTypeScript);
        assert!(!temp.path().join("tsconfig.json").exists());
    }
}
