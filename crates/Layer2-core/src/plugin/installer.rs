//! Plugin Installer - 로컬 번들 검증 및 설치
//!
//! 번들 디렉토리를 검사한 뒤 플러그인 루트 아래 `<name>/` 으로 복사한다.
//! 설치는 등록/활성화를 하지 않는다. 다음 스캔이 발견한다.

use super::manifest::{load_manifest, PluginManifest};
use gamepanel_foundation::{Error, InstallerSettings, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

// ============================================================================
// InstalledBundle
// ============================================================================

/// 설치 결과
#[derive(Debug, Clone)]
pub struct InstalledBundle {
    pub manifest: PluginManifest,
    /// 설치된 디렉토리
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// 번들 안의 항목 (번들 루트 기준 상대 경로)
#[derive(Debug)]
struct BundleEntry {
    relative: PathBuf,
    is_dir: bool,
}

#[derive(Debug, Default)]
struct BundleInventory {
    entries: Vec<BundleEntry>,
    files: usize,
    bytes: u64,
}

// ============================================================================
// PluginInstaller
// ============================================================================

/// 플러그인 설치기
pub struct PluginInstaller {
    plugin_root: PathBuf,
    max_bundle_bytes: u64,
}

impl PluginInstaller {
    pub fn new(plugin_root: impl Into<PathBuf>, settings: &InstallerSettings) -> Self {
        Self {
            plugin_root: plugin_root.into(),
            max_bundle_bytes: settings.max_bundle_bytes,
        }
    }

    pub fn with_max_bundle_bytes(mut self, bytes: u64) -> Self {
        self.max_bundle_bytes = bytes;
        self
    }

    pub fn plugin_root(&self) -> &Path {
        &self.plugin_root
    }

    /// 로컬 디렉토리에서 설치
    ///
    /// 매니페스트가 유효해야 하고, 심볼릭 링크/번들 밖을 가리키는 경로/크기
    /// 초과/같은 이름의 기존 설치는 `Error::Upload` 로 거부된다.
    pub async fn install_from_dir(&self, source: &Path) -> Result<InstalledBundle> {
        info!(source = %source.display(), "Installing plugin bundle");

        let metadata = fs::symlink_metadata(source)
            .await
            .map_err(|e| Error::Upload(format!("cannot read bundle {}: {}", source.display(), e)))?;
        if !metadata.is_dir() {
            return Err(Error::Upload(format!(
                "bundle {} is not a directory",
                source.display()
            )));
        }

        let manifest = load_manifest(source).await?;
        let inventory = self.inspect(source).await?;

        if inventory.bytes > self.max_bundle_bytes {
            return Err(Error::Upload(format!(
                "bundle is {} bytes, limit is {} bytes",
                inventory.bytes, self.max_bundle_bytes
            )));
        }

        let target = self.plugin_root.join(&manifest.name);
        if fs::symlink_metadata(&target).await.is_ok() {
            return Err(Error::Upload(format!(
                "plugin '{}' is already installed at {}",
                manifest.name,
                target.display()
            )));
        }

        fs::create_dir_all(&self.plugin_root).await?;
        if let Err(e) = copy_entries(source, &target, &inventory.entries).await {
            warn!(target = %target.display(), error = %e, "Install failed, removing partial copy");
            if let Err(cleanup) = fs::remove_dir_all(&target).await {
                debug!(error = %cleanup, "Partial copy cleanup failed");
            }
            return Err(e);
        }

        info!(
            plugin = %manifest.name,
            version = %manifest.version,
            files = inventory.files,
            bytes = inventory.bytes,
            "Installed plugin bundle"
        );
        Ok(InstalledBundle {
            manifest,
            path: target,
            files: inventory.files,
            bytes: inventory.bytes,
        })
    }

    /// 번들 전체를 걸으며 안전성 검사
    async fn inspect(&self, source: &Path) -> Result<BundleInventory> {
        let mut inventory = BundleInventory::default();
        let mut pending = vec![PathBuf::new()];

        while let Some(relative_dir) = pending.pop() {
            let mut entries = fs::read_dir(source.join(&relative_dir)).await?;

            while let Some(entry) = entries.next_entry().await? {
                let relative = relative_dir.join(entry.file_name());
                ensure_contained(&relative)?;

                let metadata = fs::symlink_metadata(entry.path()).await?;
                let file_type = metadata.file_type();

                if file_type.is_symlink() {
                    return Err(Error::Upload(format!(
                        "bundle contains a symbolic link: {}",
                        relative.display()
                    )));
                }

                if file_type.is_dir() {
                    pending.push(relative.clone());
                    inventory.entries.push(BundleEntry {
                        relative,
                        is_dir: true,
                    });
                } else if file_type.is_file() {
                    inventory.files += 1;
                    inventory.bytes += metadata.len();
                    inventory.entries.push(BundleEntry {
                        relative,
                        is_dir: false,
                    });
                } else {
                    return Err(Error::Upload(format!(
                        "bundle contains an unsupported file type: {}",
                        relative.display()
                    )));
                }
            }
        }

        // 상위 디렉토리가 먼저 생성되도록
        inventory
            .entries
            .sort_by(|a, b| a.relative.components().count().cmp(&b.relative.components().count()));
        Ok(inventory)
    }
}

/// 상대 경로가 번들 안에 머무는지
fn ensure_contained(relative: &Path) -> Result<()> {
    if relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        Ok(())
    } else {
        Err(Error::Upload(format!(
            "bundle path escapes the bundle: {}",
            relative.display()
        )))
    }
}

async fn copy_entries(source: &Path, target: &Path, entries: &[BundleEntry]) -> Result<()> {
    fs::create_dir_all(target).await?;
    for entry in entries {
        let destination = target.join(&entry.relative);
        if entry.is_dir {
            fs::create_dir_all(&destination).await?;
        } else {
            fs::copy(source.join(&entry.relative), &destination).await?;
        }
    }
    Ok(())
}

// ============================================================================
// 테스트
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn bundle(root: &Path, name: &str) -> PathBuf {
        let dir = root.join("upload").join(name);
        fs::create_dir_all(dir.join("routes")).await.unwrap();
        fs::write(
            dir.join("plugin.json"),
            format!(r#"{{"name":"{}","version":"1.0.0","capabilities":["routes"]}}"#, name),
        )
        .await
        .unwrap();
        fs::write(dir.join("routes").join("web.json"), "[]").await.unwrap();
        dir
    }

    fn installer(root: &Path) -> PluginInstaller {
        PluginInstaller::new(root.join("plugins"), &InstallerSettings::default())
    }

    #[tokio::test]
    async fn test_install_from_dir() {
        let temp = TempDir::new().unwrap();
        let source = bundle(temp.path(), "billing").await;

        let installed = installer(temp.path()).install_from_dir(&source).await.unwrap();

        assert_eq!(installed.manifest.name, "billing");
        assert_eq!(installed.path, temp.path().join("plugins").join("billing"));
        assert_eq!(installed.files, 2);
        assert!(installed.path.join("routes").join("web.json").is_file());
    }

    #[tokio::test]
    async fn test_existing_install_is_rejected() {
        let temp = TempDir::new().unwrap();
        let source = bundle(temp.path(), "billing").await;
        let installer = installer(temp.path());

        installer.install_from_dir(&source).await.unwrap();
        let err = installer.install_from_dir(&source).await.unwrap_err();
        assert!(matches!(err, Error::Upload(ref msg) if msg.contains("already installed")));
    }

    #[tokio::test]
    async fn test_oversized_bundle_is_rejected() {
        let temp = TempDir::new().unwrap();
        let source = bundle(temp.path(), "billing").await;

        let err = installer(temp.path())
            .with_max_bundle_bytes(8)
            .install_from_dir(&source)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upload(ref msg) if msg.contains("limit")));
        assert!(!temp.path().join("plugins").join("billing").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_is_rejected() {
        let temp = TempDir::new().unwrap();
        let source = bundle(temp.path(), "billing").await;
        std::os::unix::fs::symlink("/etc/passwd", source.join("passwd")).unwrap();

        let err = installer(temp.path()).install_from_dir(&source).await.unwrap_err();
        assert!(matches!(err, Error::Upload(ref msg) if msg.contains("symbolic link")));
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_rejected() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("upload").join("broken");
        fs::create_dir_all(&source).await.unwrap();
        fs::write(source.join("plugin.json"), r#"{"version":"1.0.0"}"#)
            .await
            .unwrap();

        let err = installer(temp.path()).install_from_dir(&source).await.unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        assert!(ensure_contained(Path::new("routes/web.json")).is_ok());
        assert!(ensure_contained(Path::new("../outside")).is_err());
        assert!(ensure_contained(Path::new("/etc/passwd")).is_err());
    }
}
