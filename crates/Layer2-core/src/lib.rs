//! gamepanel-core: Plugin runtime for gamepanel
//!
//! Layer2 - 플러그인 런타임 레이어
//!
//! # 주요 모듈
//!
//! - `plugin`: 발견, 의존성, 라이프사이클, 기여물 레지스트리, 헬스 체크
//!
//! # 사용 예시
//!
//! ```ignore
//! use gamepanel_core::{PluginManager, RequestContext};
//! use gamepanel_foundation::{Actor, RuntimeConfig};
//!
//! let manager = PluginManager::open(&RuntimeConfig::load()?).await?;
//! let report = manager.boot().await?;
//!
//! // 운영자 동작
//! manager.enable("reports", Actor::user("12")).await?;
//! manager.disable("core-analytics", true, Actor::user("12")).await?;
//!
//! // 기여물 조회
//! let routes = manager.contributions().routes.items();
//! let widgets = manager.contributions().widgets.visible(&RequestContext::admin("12"));
//!
//! // 주기 헬스 체크
//! let handle = manager.spawn_health_checks();
//! ```

pub mod plugin;

// Re-exports: Plugin
pub use plugin::{
    // Reports
    BootReport,
    // Capabilities
    CapabilityRegistry,
    CollectionReport,
    // Contributions
    ConsoleCommand,
    Contribution,
    ContributionProvider,
    ContributionRegistries,
    ContributionRegistry,
    CronTask,
    // Resolver
    DependencyResolver,
    // Events
    EventBus,
    EventType,
    // Health
    HealthCheck,
    HealthCheckResult,
    HealthReport,
    // Traits
    Plugin,
    PluginContext,
    PluginEvent,
    PluginEventHandler,
    // Installer
    PluginInstaller,
    // Manager
    PluginManager,
    PluginManagerConfig,
    // Manifest
    PluginManifest,
    PluginStatus,
    PluginSummary,
    RequestContext,
    Route,
    ServerTab,
    Widget,
};

// Layer1 re-exports
pub use gamepanel_foundation::{Error, Result};

/// Layer2 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
