//! Plugin Manager - 플러그인 런타임 파사드
//!
//! 저장소, 기능 레지스트리, 기여물 레지스트리, 이벤트 버스, 감사 로거,
//! 헬스 체크 서비스를 소유하고 운영자 동작(enable/disable/status/health)과
//! 부팅 절차를 제공한다.

use super::audit::AuditEventHandler;
use super::capability::CapabilityRegistry;
use super::contribution::{CollectionReport, ContributionCounts, ContributionRegistries};
use super::discovery::{DiscoveryReport, PluginDiscovery};
use super::events::EventBus;
use super::health::{HealthCheckConfig, HealthCheckService, HealthReport, PluginHealth};
use super::installer::{InstalledBundle, PluginInstaller};
use super::lifecycle::{PluginLifecycle, REASON_DEPENDENCY_UNSATISFIED};
use super::resolver::{installed_from_records, validate_dependencies, InstalledPlugin};
use super::traits::{Plugin, PluginContext};
use gamepanel_foundation::{
    Actor, AuditLogger, Capability, Error, InstallerSettings, PluginRecord, PluginState,
    RegisterOutcome, Result, RuntimeConfig, Storage,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 이번 스캔에서 등록되지 못한 Enabled 플러그인의 Faulted 사유 접두어
pub const REASON_PLUGIN_UNAVAILABLE: &str = "plugin_unavailable";

/// 플러그인 매니저 설정
#[derive(Debug, Clone)]
pub struct PluginManagerConfig {
    /// 플러그인 루트
    pub plugin_root: PathBuf,

    /// 헬스 체크 설정
    pub health: HealthCheckConfig,

    /// 헬스 체크 주기
    pub health_interval: Duration,

    /// 번들 설치 설정
    pub installer: InstallerSettings,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for PluginManagerConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            plugin_root: config.plugin_root.clone(),
            health: HealthCheckConfig::from(&config.health),
            health_interval: config.health.interval(),
            installer: config.installer.clone(),
        }
    }
}

impl PluginManagerConfig {
    pub fn with_plugin_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugin_root = root.into();
        self
    }

    pub fn with_health(mut self, health: HealthCheckConfig) -> Self {
        self.health = health;
        self
    }
}

// ============================================================================
// Reports
// ============================================================================

/// 부팅 결과
#[derive(Debug, Default)]
pub struct BootReport {
    /// 발견 단계 결과 (로드 실패, 중복, 순환)
    pub discovery: DiscoveryReport,

    /// 새로 등록된 플러그인
    pub registered: Vec<String>,

    /// 버전이 바뀐 플러그인
    pub updated: Vec<String>,

    /// 등록 중 실패 (플러그인, 오류)
    pub registration_failures: Vec<(String, Error)>,

    /// 부팅 검증에서 Faulted 로 전이된 플러그인 (플러그인, 사유)
    pub faulted: Vec<(String, String)>,

    /// 최종 기여물 수집 결과
    pub collection: CollectionReport,
}

impl BootReport {
    /// 경고 없이 부팅되었는지
    pub fn is_clean(&self) -> bool {
        self.discovery.failures.is_empty()
            && self.discovery.rejected.is_empty()
            && self.registration_failures.is_empty()
            && self.faulted.is_empty()
            && self.collection.is_clean()
    }
}

/// 플러그인 상태 조회 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    pub record: PluginRecord,
    pub health: Option<PluginHealth>,
    pub capabilities: BTreeSet<Capability>,
    pub contributions: ContributionCounts,
}

/// 플러그인 요약
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub total: usize,
    pub by_state: BTreeMap<PluginState, u64>,
    pub contributions: ContributionCounts,
    pub audit_failed_writes: u64,
}

// ============================================================================
// PluginManager
// ============================================================================

/// 플러그인 매니저 - 전체 플러그인 시스템 관리
pub struct PluginManager {
    config: PluginManagerConfig,
    storage: Storage,
    audit: Arc<AuditLogger>,
    events: Arc<EventBus>,
    capabilities: Arc<CapabilityRegistry>,
    contributions: Arc<ContributionRegistries>,
    lifecycle: Arc<PluginLifecycle>,
    health: Arc<HealthCheckService>,

    /// 코드가 바인딩된 플러그인
    bound: RwLock<BTreeSet<String>>,
}

impl PluginManager {
    /// 저장소와 감사 로거로 생성
    pub async fn new(storage: Storage, audit: AuditLogger, config: PluginManagerConfig) -> Self {
        let audit = Arc::new(audit);
        let events = Arc::new(EventBus::new());
        let capabilities = Arc::new(CapabilityRegistry::new());
        let contributions = Arc::new(ContributionRegistries::new());
        let lifecycle = Arc::new(PluginLifecycle::new(
            storage.clone(),
            capabilities.clone(),
            contributions.clone(),
            events.clone(),
        ));
        let health = Arc::new(HealthCheckService::new(
            lifecycle.clone(),
            config.health.clone(),
        ));

        events
            .register_handler(Arc::new(AuditEventHandler::new(audit.clone())))
            .await;
        events.register_handler(health.event_handler()).await;

        Self {
            config,
            storage,
            audit,
            events,
            capabilities,
            contributions,
            lifecycle,
            health,
            bound: RwLock::new(BTreeSet::new()),
        }
    }

    /// 설정의 데이터 디렉토리에 있는 SQLite 파일로 생성
    pub async fn open(config: &RuntimeConfig) -> Result<Self> {
        let storage = Storage::new(&config.data_dir)?;
        let audit = AuditLogger::open(&Storage::database_path(&config.data_dir))?;
        Ok(Self::new(storage, audit, PluginManagerConfig::from(config)).await)
    }

    /// 인메모리 저장소로 생성 (테스트용)
    pub async fn in_memory(config: PluginManagerConfig) -> Result<Self> {
        let storage = Storage::in_memory()?;
        let audit = AuditLogger::in_memory()?;
        Ok(Self::new(storage, audit, config).await)
    }

    // ========================================================================
    // 바인딩
    // ========================================================================

    /// 컴파일된 플러그인 코드 바인딩
    ///
    /// `on_load` 가 등록한 provider 와 헬스 체크 훅을 연결한다. 부팅 전에
    /// 호출한다. 이후에 바인딩하면 다음 재수집부터 반영된다.
    pub fn bind(&self, plugin: &dyn Plugin) -> Result<()> {
        let name = plugin.name().to_string();
        let mut ctx = PluginContext::new(&name, self.config.plugin_root.join(&name));
        plugin.on_load(&mut ctx)?;

        let (providers, hook) = ctx.into_parts();
        self.contributions.bind(&name, providers);
        match hook {
            Some(hook) => self.health.register_hook(&name, hook),
            None => self.health.remove_hook(&name),
        }

        info!(plugin = %name, "Plugin code bound");
        self.bound.write().insert(name);
        Ok(())
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bound.read().contains(name)
    }

    // ========================================================================
    // 부팅
    // ========================================================================

    /// 부팅 절차
    ///
    /// 스캔 → 로드 → 중복/순환 제외 → 등록 → 저장된 Enabled 플러그인을 활성화
    /// 순서로 재검증 → 재수집. 한 플러그인의 실패로 중단되지 않는다.
    pub async fn boot(&self) -> Result<BootReport> {
        info!(root = %self.config.plugin_root.display(), "Booting plugin runtime");
        let mut report = BootReport {
            discovery: PluginDiscovery::new(&self.config.plugin_root, self.events.clone())
                .discover()
                .await,
            ..BootReport::default()
        };

        let discovered: BTreeSet<String> = report
            .discovery
            .plugins
            .iter()
            .map(|p| p.manifest.name.clone())
            .collect();
        self.lifecycle.retain_manifests(&discovered);

        for plugin in &report.discovery.plugins {
            let name = plugin.manifest.name.clone();
            match self
                .lifecycle
                .register(plugin.manifest.clone(), &plugin.path)
                .await
            {
                Ok(RegisterOutcome::Created) => report.registered.push(name),
                Ok(RegisterOutcome::Updated { .. }) => report.updated.push(name),
                Ok(RegisterOutcome::Unchanged) => {}
                Err(e) => {
                    error!(plugin = %name, error = %e, "Plugin registration failed");
                    report.registration_failures.push((name, e));
                }
            }
        }

        self.revalidate_enabled(&mut report).await?;

        report.collection = self.lifecycle.rebuild_and_fault().await?;
        for failure in &report.collection.failures {
            warn!(plugin = %failure.plugin, error = %failure.error, "Plugin faulted during boot collection");
        }

        info!(
            registered = report.registered.len(),
            updated = report.updated.len(),
            faulted = report.faulted.len(),
            contributions = report.collection.total(),
            "Plugin runtime booted"
        );
        Ok(report)
    }

    /// 저장된 Enabled 플러그인 재검증
    ///
    /// 활성화 순서로 돌면서 의존성이 깨진 플러그인을 Faulted 로 전이한다. 앞에서
    /// Faulted 된 플러그인에 의존하는 플러그인도 같은 패스에서 걸린다.
    async fn revalidate_enabled(&self, report: &mut BootReport) -> Result<()> {
        let records = self.storage.list_plugins()?;
        let mut installed = installed_from_records(&records);

        for record in records.iter().filter(|r| r.state == PluginState::Enabled) {
            if self.lifecycle.manifest(&record.name).is_some() {
                continue;
            }
            let detail = match report.discovery.rejected_for(&record.name) {
                Some(rejected) => rejected.error.to_string(),
                None => "not found under plugin root".to_string(),
            };
            let reason = format!("{}: {}", REASON_PLUGIN_UNAVAILABLE, detail);
            self.boot_fault(&record.name, reason, &mut installed, report).await;
        }

        let graph = self.lifecycle.resolver();
        for name in self.lifecycle.enabled_in_order()? {
            let Some(manifest) = self.lifecycle.manifest(&name) else {
                continue;
            };

            let violations = validate_dependencies(&manifest, &installed, &graph);
            if violations.is_empty() {
                continue;
            }

            let reason = format!(
                "{}: {}",
                REASON_DEPENDENCY_UNSATISFIED,
                violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            self.boot_fault(&name, reason, &mut installed, report).await;
        }

        Ok(())
    }

    async fn boot_fault(
        &self,
        name: &str,
        reason: String,
        installed: &mut BTreeMap<String, InstalledPlugin>,
        report: &mut BootReport,
    ) {
        match self.lifecycle.fault_if_enabled(name, &reason).await {
            Ok(true) => {
                if let Some(entry) = installed.get_mut(name) {
                    entry.state = PluginState::Faulted;
                }
                report.faulted.push((name.to_string(), reason));
            }
            Ok(false) => {}
            Err(e) => error!(plugin = name, error = %e, "Failed to fault plugin during boot"),
        }
    }

    // ========================================================================
    // 운영자 동작
    // ========================================================================

    pub async fn enable(&self, name: &str, actor: Actor) -> Result<PluginRecord> {
        self.lifecycle.enable(name, actor).await
    }

    /// 비활성화된 플러그인 목록 반환 (cascade 포함, 순서대로)
    pub async fn disable(&self, name: &str, cascade: bool, actor: Actor) -> Result<Vec<String>> {
        self.lifecycle.disable(name, cascade, actor).await
    }

    /// 상태 + 최신 헬스 + 기여물 수
    pub fn status(&self, name: &str) -> Result<PluginStatus> {
        let record = self.storage.require_plugin(name)?;
        Ok(PluginStatus {
            health: self.health.latest(name),
            capabilities: self.capabilities.capabilities_of(name),
            contributions: self.contributions.counts_for(name),
            record,
        })
    }

    pub async fn run_health_checks(&self) -> HealthReport {
        self.health.run_all_health_checks().await
    }

    /// 주기 헬스 체크 시작
    pub fn spawn_health_checks(&self) -> JoinHandle<()> {
        self.health.clone().spawn(self.config.health_interval)
    }

    /// 로컬 번들 설치 (등록은 다음 부팅/스캔에서)
    pub async fn install(&self, source: &Path) -> Result<InstalledBundle> {
        PluginInstaller::new(&self.config.plugin_root, &self.config.installer)
            .install_from_dir(source)
            .await
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn list(&self) -> Result<Vec<PluginRecord>> {
        self.storage.list_plugins()
    }

    /// 등록된 모든 플러그인의 활성화 순서
    pub fn activation_order(&self) -> Result<Vec<String>> {
        self.lifecycle.resolver().compute_activation_order()
    }

    pub fn summary(&self) -> Result<PluginSummary> {
        let by_state: BTreeMap<PluginState, u64> =
            self.storage.count_by_state()?.into_iter().collect();
        Ok(PluginSummary {
            total: by_state.values().sum::<u64>() as usize,
            by_state,
            contributions: self.contributions.counts(),
            audit_failed_writes: self.audit.failed_writes(),
        })
    }

    // ========================================================================
    // 접근자
    // ========================================================================

    pub fn config(&self) -> &PluginManagerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    pub fn contributions(&self) -> &Arc<ContributionRegistries> {
        &self.contributions
    }

    pub fn lifecycle(&self) -> &Arc<PluginLifecycle> {
        &self.lifecycle
    }

    pub fn health(&self) -> &Arc<HealthCheckService> {
        &self.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::contribution::Route;
    use tempfile::TempDir;

    struct RoutesPlugin(&'static str);

    impl Plugin for RoutesPlugin {
        fn name(&self) -> &str {
            self.0
        }

        fn on_load(&self, ctx: &mut PluginContext) -> Result<()> {
            let path = format!("/{}", self.0);
            ctx.register_routes(move || -> Result<Vec<Route>> { Ok(vec![Route::get(path.clone())]) });
            Ok(())
        }
    }

    fn write_plugin(root: &Path, name: &str, extra: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("plugin.json"),
            format!(
                r#"{{"name":"{}","version":"1.0.0","capabilities":["routes"]{}}}"#,
                name, extra
            ),
        )
        .unwrap();
    }

    async fn manager(root: &Path) -> PluginManager {
        PluginManager::in_memory(PluginManagerConfig::default().with_plugin_root(root))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_boot_registers_discovered_plugins() {
        let temp = TempDir::new().unwrap();
        write_plugin(temp.path(), "billing", "");
        write_plugin(temp.path(), "tickets", "");

        let manager = manager(temp.path()).await;
        let report = manager.boot().await.unwrap();

        assert_eq!(report.registered, vec!["billing", "tickets"]);
        assert!(report.is_clean());
        let states: Vec<PluginState> = manager.list().unwrap().iter().map(|r| r.state).collect();
        assert_eq!(states, vec![PluginState::Registered, PluginState::Registered]);

        // 재부팅은 새로 등록하지 않는다
        let report = manager.boot().await.unwrap();
        assert!(report.registered.is_empty());
    }

    #[tokio::test]
    async fn test_bound_plugin_contributes_after_enable() {
        let temp = TempDir::new().unwrap();
        write_plugin(temp.path(), "billing", "");

        let manager = manager(temp.path()).await;
        manager.bind(&RoutesPlugin("billing")).unwrap();
        assert!(manager.is_bound("billing"));
        manager.boot().await.unwrap();

        assert!(manager.contributions().routes.is_empty());
        manager.enable("billing", Actor::user("1")).await.unwrap();

        let status = manager.status("billing").unwrap();
        assert_eq!(status.record.state, PluginState::Enabled);
        assert_eq!(status.contributions.routes, 1);
        assert!(status.capabilities.contains(&Capability::Routes));

        let summary = manager.summary().unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.by_state[&PluginState::Enabled], 1);
    }

    #[tokio::test]
    async fn test_boot_faults_enabled_plugin_with_missing_dependency() {
        let temp = TempDir::new().unwrap();
        write_plugin(temp.path(), "base", "");
        write_plugin(temp.path(), "addon", r#","dependencies":{"base":"^1.0"}"#);

        let manager = manager(temp.path()).await;
        manager.boot().await.unwrap();
        manager.enable("base", Actor::System).await.unwrap();
        manager.enable("addon", Actor::System).await.unwrap();

        // base 가 사라진 채로 재부팅
        std::fs::remove_dir_all(temp.path().join("base")).unwrap();
        let report = manager.boot().await.unwrap();

        let faulted: Vec<&str> = report.faulted.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(faulted, vec!["base", "addon"]);
        assert!(report.faulted[1].1.starts_with(REASON_DEPENDENCY_UNSATISFIED));
        assert_eq!(
            manager.status("addon").unwrap().record.state,
            PluginState::Faulted
        );
    }

    #[tokio::test]
    async fn test_activation_order() {
        let temp = TempDir::new().unwrap();
        write_plugin(temp.path(), "reports", r#","dependencies":{"analytics":"*"}"#);
        write_plugin(temp.path(), "analytics", "");
        write_plugin(temp.path(), "billing", "");

        let manager = manager(temp.path()).await;
        manager.boot().await.unwrap();

        assert_eq!(
            manager.activation_order().unwrap(),
            vec!["analytics", "billing", "reports"]
        );
    }
}
