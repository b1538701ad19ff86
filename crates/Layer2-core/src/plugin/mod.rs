//! # Plugin System
//!
//! 게임 서버 호스팅 패널의 플러그인 런타임
//!
//! ## 개요
//!
//! - 플러그인 루트에서 `plugin.json` 을 가진 디렉토리를 발견
//! - 기능(capability)과 의존성(semver 범위) 검증
//! - 라이프사이클 상태 머신으로 전이 관리 (전이마다 감사 기록)
//! - Enabled 이면서 기능을 가진 플러그인의 기여물만 레지스트리에 수집
//! - 주기 헬스 체크, 연속 실패 시 Faulted
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PluginManager                         │
//! │                                                             │
//! │  PluginDiscovery ──► PluginManifest ──► DependencyResolver  │
//! │                                 │              │            │
//! │                                 ▼              ▼            │
//! │        CapabilityRegistry ◄── PluginLifecycle (CAS + lock)  │
//! │                 │                   │          │            │
//! │                 ▼                   ▼          ▼            │
//! │        ContributionRegistries    EventBus ──► AuditEventHandler
//! │   (routes/commands/cron/widgets/tabs)            │          │
//! │                                                  ▼          │
//! │        HealthCheckService ──(fault)──►      AuditLogger     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 예시
//!
//! ```ignore
//! struct Billing;
//!
//! impl Plugin for Billing {
//!     fn name(&self) -> &str { "billing" }
//!     fn on_load(&self, ctx: &mut PluginContext) -> Result<()> {
//!         ctx.register_routes(|| Ok(vec![Route::get("/billing")]));
//!         Ok(())
//!     }
//! }
//!
//! let manager = PluginManager::open(&RuntimeConfig::load()?).await?;
//! manager.bind(&Billing)?;
//! manager.boot().await?;
//! manager.enable("billing", Actor::user("1")).await?;
//! ```

mod audit;
mod capability;
mod contribution;
mod discovery;
mod events;
mod health;
mod installer;
mod lifecycle;
mod manager;
mod manifest;
mod resolver;
mod traits;

pub use audit::AuditEventHandler;
pub use capability::CapabilityRegistry;
pub use contribution::{
    CollectionFailure, CollectionReport, CommandHandler, ConsoleCommand, Contribution,
    ContributionCounts, ContributionEntry, ContributionProvider, ContributionRegistries,
    ContributionRegistry, CronTask, HttpMethod, ProviderSet, RequestContext, Route, ServerTab,
    VisibilityPredicate, Widget,
};
pub use discovery::{
    scan, CandidateDirs, DiscoveredPlugin, DiscoveryFailure, DiscoveryReport, PluginDiscovery,
    RejectedPlugin,
};
pub use events::{EventBus, EventType, PluginEvent, PluginEventHandler, PluginEventKind};
pub use health::{
    HealthCheckConfig, HealthCheckResult, HealthCheckService, HealthReport, HealthResetHandler,
    PluginHealth,
};
pub use installer::{InstalledBundle, PluginInstaller};
pub use lifecycle::{
    PluginLifecycle, PluginLocks, REASON_CONTRIBUTION_FAILED, REASON_DEPENDENCY_UNSATISFIED,
    REASON_HEALTH_CHECK_FAILED,
};
pub use manager::{
    BootReport, PluginManager, PluginManagerConfig, PluginStatus, PluginSummary,
    REASON_PLUGIN_UNAVAILABLE,
};
pub use manifest::{load_manifest, EntryPoints, PluginManifest, MANIFEST_FILE};
pub use resolver::{
    installed_from_records, validate_dependencies, DependencyCycle, DependencyResolver,
    InstalledPlugin,
};
pub use traits::{HealthCheck, Plugin, PluginContext};
