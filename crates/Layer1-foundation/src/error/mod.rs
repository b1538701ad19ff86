//! Error types for gamepanel
//!
//! 플러그인 런타임의 모든 에러를 중앙에서 관리

use crate::core::{Capability, PluginState};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// DependencyViolation - 의존성 검증 실패 사유
// ============================================================================

/// 의존성 검증에서 발견된 개별 위반 사항
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyViolation {
    /// 필요한 플러그인이 설치되어 있지 않음 (또는 Enabled 상태가 아님)
    Missing {
        dependency: String,
        reason: String,
    },

    /// 설치된 버전이 요구 범위를 만족하지 않음
    VersionMismatch {
        dependency: String,
        required: String,
        installed: String,
    },

    /// 순환 의존성 (간선 순서, 첫 노드로 닫힘)
    Circular { cycle: Vec<String> },
}

impl DependencyViolation {
    /// 위반과 관련된 의존성 이름
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Missing { dependency, .. } | Self::VersionMismatch { dependency, .. } => {
                Some(dependency)
            }
            Self::Circular { .. } => None,
        }
    }
}

impl fmt::Display for DependencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { dependency, reason } => {
                write!(f, "missing dependency '{}' ({})", dependency, reason)
            }
            Self::VersionMismatch {
                dependency,
                required,
                installed,
            } => write!(
                f,
                "dependency '{}' requires version {} but {} is installed",
                dependency, required, installed
            ),
            Self::Circular { cycle } => write!(f, "circular dependency: {}", cycle.join(" -> ")),
        }
    }
}

fn join_violations(violations: &[DependencyViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Error
// ============================================================================

/// gamepanel 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 매니페스트 / 기능
    // ========================================================================
    #[error("Manifest error at {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("Plugin '{plugin}' has not declared capability '{capability}' required to {operation}")]
    Capability {
        plugin: String,
        capability: Capability,
        operation: String,
    },

    #[error("Unknown capability: '{token}'")]
    UnknownCapability { token: String },

    // ========================================================================
    // 의존성
    // ========================================================================
    #[error("Dependency error: {0}")]
    Dependency(DependencyViolation),

    #[error("Dependency error for plugin '{plugin}': {}", join_violations(.violations))]
    Dependencies {
        plugin: String,
        violations: Vec<DependencyViolation>,
    },

    #[error("Circular dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    // ========================================================================
    // 라이프사이클
    // ========================================================================
    #[error("Cannot transition plugin '{plugin}' from {from} to {to}: {reason}")]
    StateTransition {
        plugin: String,
        from: PluginState,
        to: PluginState,
        reason: String,
    },

    #[error("Plugin '{plugin}' faulted: {message}")]
    RuntimeFault { plugin: String, message: String },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("{kind} '{id}' is already registered")]
    AlreadyRegistered { kind: String, id: String },

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 운영자에게 그대로 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Manifest { .. }
                | Error::Capability { .. }
                | Error::UnknownCapability { .. }
                | Error::Dependency(_)
                | Error::Dependencies { .. }
                | Error::CircularDependency { .. }
                | Error::StateTransition { .. }
                | Error::Upload(_)
                | Error::AlreadyRegistered { .. }
                | Error::NotFound(_)
        )
    }

    /// 의존성 관련 에러인지 확인
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            Error::Dependency(_) | Error::Dependencies { .. } | Error::CircularDependency { .. }
        )
    }

    /// 매니페스트 에러 생성 헬퍼
    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// 기능 미선언 에러 생성 헬퍼
    pub fn capability(
        plugin: impl Into<String>,
        capability: Capability,
        operation: impl Into<String>,
    ) -> Self {
        Error::Capability {
            plugin: plugin.into(),
            capability,
            operation: operation.into(),
        }
    }

    /// 상태 전이 에러 생성 헬퍼
    pub fn transition(
        plugin: impl Into<String>,
        from: PluginState,
        to: PluginState,
        reason: impl Into<String>,
    ) -> Self {
        Error::StateTransition {
            plugin: plugin.into(),
            from,
            to,
            reason: reason.into(),
        }
    }

    /// 런타임 장애 에러 생성 헬퍼
    pub fn runtime_fault(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RuntimeFault {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// 중복 등록 에러 생성 헬퍼
    pub fn already_registered(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::AlreadyRegistered {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
