//! Plugin Discovery - 플러그인 발견 및 로드
//!
//! 플러그인 루트의 하위 디렉토리 중 `plugin.json` 이 있는 것을 후보로 본다.
//! 한 플러그인의 실패는 나머지 스캔을 멈추지 않는다.

use super::events::{EventBus, PluginEvent};
use super::manifest::{load_manifest, PluginManifest, MANIFEST_FILE};
use super::resolver::{DependencyCycle, DependencyResolver};
use gamepanel_foundation::Error;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// scan - 후보 디렉토리 (lazy)
// ============================================================================

/// 후보 디렉토리 이터레이터
///
/// 한 번만 순회할 수 있다. 루트를 읽을 수 없으면 비어 있다.
pub struct CandidateDirs {
    entries: Option<fs::ReadDir>,
}

impl Iterator for CandidateDirs {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            if path.is_dir() && path.join(MANIFEST_FILE).is_file() {
                return Some(path);
            }
        }
        None
    }
}

/// 플러그인 루트 스캔
pub fn scan(root: &Path) -> CandidateDirs {
    match fs::read_dir(root) {
        Ok(entries) => CandidateDirs {
            entries: Some(entries),
        },
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Plugin root is not readable");
            CandidateDirs { entries: None }
        }
    }
}

// ============================================================================
// DiscoveryReport
// ============================================================================

/// 발견된 플러그인 정보
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    /// 플러그인 매니페스트
    pub manifest: PluginManifest,

    /// 플러그인 디렉토리 경로
    pub path: PathBuf,
}

/// 매니페스트를 읽지 못한 디렉토리
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: Error,
}

/// 로드는 됐지만 등록에서 제외된 플러그인 (이름 중복, 순환 의존)
#[derive(Debug)]
pub struct RejectedPlugin {
    pub name: String,
    pub path: PathBuf,
    pub error: Error,
}

/// 한 번의 발견 결과
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// 등록 가능한 플러그인 (이름 순)
    pub plugins: Vec<DiscoveredPlugin>,

    pub failures: Vec<DiscoveryFailure>,

    pub rejected: Vec<RejectedPlugin>,

    /// 발견된 순환 (멤버는 모두 rejected 에 있음)
    pub cycles: Vec<DependencyCycle>,
}

impl DiscoveryReport {
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.manifest.name.as_str()).collect()
    }

    pub fn rejected_for(&self, name: &str) -> Option<&RejectedPlugin> {
        self.rejected.iter().find(|r| r.name == name)
    }
}

// ============================================================================
// PluginDiscovery - 플러그인 발견 시스템
// ============================================================================

/// 플러그인 발견 시스템
pub struct PluginDiscovery {
    root: PathBuf,
    events: Arc<EventBus>,
}

impl PluginDiscovery {
    pub fn new(root: impl Into<PathBuf>, events: Arc<EventBus>) -> Self {
        Self {
            root: root.into(),
            events,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 루트 스캔 → 매니페스트 로드 → 중복/순환 제외
    ///
    /// 로드에 성공한 매니페스트마다 `PluginDiscovered` 를 발행한다. 상태는
    /// 바꾸지 않는다.
    pub async fn discover(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        // read_dir 순서는 플랫폼마다 다르므로 경로 순으로 고정
        let mut candidates: Vec<PathBuf> = scan(&self.root).collect();
        candidates.sort();

        let mut loaded: BTreeMap<String, DiscoveredPlugin> = BTreeMap::new();
        for dir in candidates {
            let manifest = match load_manifest(&dir).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to load plugin manifest");
                    report.failures.push(DiscoveryFailure { path: dir, error: e });
                    continue;
                }
            };

            debug!(plugin = %manifest.name, path = %dir.display(), "Found plugin");
            self.events
                .publish(PluginEvent::discovered(manifest.clone(), dir.clone()))
                .await;

            if let Some(first) = loaded.get(&manifest.name) {
                warn!(
                    plugin = %manifest.name,
                    path = %dir.display(),
                    first = %first.path.display(),
                    "Duplicate plugin name"
                );
                report.rejected.push(RejectedPlugin {
                    name: manifest.name.clone(),
                    path: dir,
                    error: Error::already_registered("plugin", manifest.name),
                });
                continue;
            }

            loaded.insert(
                manifest.name.clone(),
                DiscoveredPlugin {
                    manifest,
                    path: dir,
                },
            );
        }

        // 순환 멤버는 함께 제외
        let cycles = DependencyResolver::new(loaded.values().map(|p| &p.manifest)).find_cycles();
        for cycle in &cycles {
            let error_text = cycle.to_error().to_string();
            warn!(members = ?cycle.members, "{}", error_text);
            for member in &cycle.members {
                if let Some(plugin) = loaded.remove(member) {
                    report.rejected.push(RejectedPlugin {
                        name: plugin.manifest.name,
                        path: plugin.path,
                        error: cycle.to_error(),
                    });
                }
            }
        }
        report.cycles = cycles;

        report.plugins = loaded.into_values().collect();
        info!(
            found = report.plugins.len(),
            failed = report.failures.len(),
            rejected = report.rejected.len(),
            "Plugin discovery complete"
        );
        report
    }
}
