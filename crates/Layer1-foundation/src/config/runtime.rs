//! Runtime Config - 플러그인 런타임 설정
//!
//! 글로벌(~/.config/gamepanel/) + 프로젝트(.gamepanel/) 설정을 병합한다.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 설정 파일명
pub const RUNTIME_CONFIG_FILE: &str = "gamepanel.json";

// ============================================================================
// Runtime Config (통합)
// ============================================================================

/// 플러그인 런타임 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// 플러그인 디렉토리 (각 하위 디렉토리가 plugin.json 을 가짐)
    #[serde(default = "default_plugin_root")]
    pub plugin_root: PathBuf,

    /// 데이터 디렉토리 (SQLite)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// 헬스 체크 설정
    #[serde(default)]
    pub health: HealthSettings,

    /// 번들 설치 설정
    #[serde(default)]
    pub installer: InstallerSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugin_root: default_plugin_root(),
            data_dir: default_data_dir(),
            health: HealthSettings::default(),
            installer: InstallerSettings::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 현재 디렉토리 프로젝트 설정 병합 로드
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Self::load_for(&cwd)
    }

    /// 글로벌 + 지정한 프로젝트 설정 병합 로드
    pub fn load_for(project_root: &Path) -> Result<Self> {
        let mut config = Self::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<RuntimeConfig>(RUNTIME_CONFIG_FILE)? {
                config.merge(global_config);
            }
        }

        // 2. 프로젝트 설정 (우선)
        let project = JsonStore::project(project_root);
        if let Some(project_config) = project.load_optional::<RuntimeConfig>(RUNTIME_CONFIG_FILE)? {
            config.merge(project_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// 프로젝트 설정 저장
    pub fn save_project(&self, project_root: &Path) -> Result<()> {
        JsonStore::project(project_root).save(RUNTIME_CONFIG_FILE, self)
    }

    /// 다른 설정 병합 (기본값이 아닌 값만 덮어씀)
    pub fn merge(&mut self, other: RuntimeConfig) {
        if other.plugin_root != default_plugin_root() {
            self.plugin_root = other.plugin_root;
        }
        if other.data_dir != default_data_dir() {
            self.data_dir = other.data_dir;
        }
        self.health.merge(other.health);
        self.installer.merge(other.installer);
    }

    /// 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.health.failure_threshold == 0 {
            return Err(Error::Config(
                "health.failureThreshold must be at least 1".to_string(),
            ));
        }
        if self.health.timeout_secs == 0 || self.health.ceiling_secs == 0 {
            return Err(Error::Config(
                "health check timeouts must be greater than zero".to_string(),
            ));
        }
        if self.health.interval_secs == 0 {
            return Err(Error::Config(
                "health.intervalSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// 상대 경로를 기준 디렉토리로 해석
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        if self.plugin_root.is_relative() {
            self.plugin_root = base.join(&self.plugin_root);
        }
        if self.data_dir.is_relative() {
            self.data_dir = base.join(&self.data_dir);
        }
        self
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_plugin_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugin_root = root.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.health.failure_threshold = threshold;
        self
    }
}

// ============================================================================
// Health Settings
// ============================================================================

/// 헬스 체크 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSettings {
    /// 주기 (초)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// 플러그인별 타임아웃 (초)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// 한 번의 실행 전체 상한 (초)
    #[serde(default = "default_ceiling_secs")]
    pub ceiling_secs: u64,

    /// 연속 실패 허용치 (도달 시 Faulted)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            ceiling_secs: default_ceiling_secs(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl HealthSettings {
    fn merge(&mut self, other: HealthSettings) {
        if other.interval_secs != default_interval_secs() {
            self.interval_secs = other.interval_secs;
        }
        if other.timeout_secs != default_timeout_secs() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.ceiling_secs != default_ceiling_secs() {
            self.ceiling_secs = other.ceiling_secs;
        }
        if other.failure_threshold != default_failure_threshold() {
            self.failure_threshold = other.failure_threshold;
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }
}

// ============================================================================
// Installer Settings
// ============================================================================

/// 번들 설치 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerSettings {
    /// 번들 최대 크기 (bytes)
    #[serde(default = "default_max_bundle_bytes")]
    pub max_bundle_bytes: u64,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            max_bundle_bytes: default_max_bundle_bytes(),
        }
    }
}

impl InstallerSettings {
    fn merge(&mut self, other: InstallerSettings) {
        if other.max_bundle_bytes != default_max_bundle_bytes() {
            self.max_bundle_bytes = other.max_bundle_bytes;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_plugin_root() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".gamepanel").join("data")
}

fn default_interval_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_ceiling_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_bundle_bytes() -> u64 {
    50 * 1024 * 1024
}
