//! Plugin Lifecycle - 상태 머신과 전이 가드
//!
//! ```text
//!  Discovered ──► Registered ──► Enabled ◄──► Disabled
//!                                   │            ▲
//!                                   ▼            │
//!                                Faulted ────────┘
//! ```
//!
//! 모든 전이는 플러그인별 async mutex 안에서 "검증 → CAS 기록 → 이벤트 → 재수집"
//! 순으로 진행된다. enable 은 직접 의존 대상의 락을, disable 은 역의존 플러그인의
//! 락을 함께 잡으며 여러 락은 항상 이름 순으로 획득한다. 재수집은 전역 rebuild
//! mutex 로 직렬화되고, 재수집 중 실패한 다른 플러그인은 호출자의 락을 놓은 뒤
//! Faulted 로 전이된다.

use super::capability::CapabilityRegistry;
use super::contribution::{CollectionReport, ContributionRegistries};
use super::events::{EventBus, PluginEvent};
use super::manifest::PluginManifest;
use super::resolver::{installed_from_records, validate_dependencies, DependencyResolver};
use gamepanel_foundation::{
    Actor, Error, PluginRecord, PluginRegistration, PluginState, RegisterOutcome, Result, Storage,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// 헬스 체크 실패로 인한 Faulted 사유
pub const REASON_HEALTH_CHECK_FAILED: &str = "health_check_failed";

/// 부팅 시 의존성 불충족으로 인한 Faulted 사유 접두어
pub const REASON_DEPENDENCY_UNSATISFIED: &str = "dependency_unsatisfied";

/// 수집 실패로 인한 Faulted 사유 접두어
pub const REASON_CONTRIBUTION_FAILED: &str = "contribution_failed";

// ============================================================================
// PluginLocks - 플러그인별 상호 배제
// ============================================================================

/// 플러그인 이름 → async mutex
#[derive(Default)]
pub struct PluginLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PluginLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 플러그인의 락 (없으면 생성)
    pub fn lock_for(&self, plugin: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(plugin.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// 여러 플러그인의 락을 이름 순으로 획득
    pub async fn lock_all<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<OwnedMutexGuard<()>> {
        let ordered: BTreeSet<&str> = names.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for name in ordered {
            guards.push(self.lock_for(name).lock_owned().await);
        }
        guards
    }
}

// ============================================================================
// PluginLifecycle
// ============================================================================

/// 라이프사이클 상태 머신
pub struct PluginLifecycle {
    storage: Storage,
    capabilities: Arc<CapabilityRegistry>,
    contributions: Arc<ContributionRegistries>,
    events: Arc<EventBus>,

    /// 등록된 플러그인의 매니페스트
    manifests: RwLock<BTreeMap<String, PluginManifest>>,

    locks: PluginLocks,
    rebuild_lock: AsyncMutex<()>,
}

impl PluginLifecycle {
    pub fn new(
        storage: Storage,
        capabilities: Arc<CapabilityRegistry>,
        contributions: Arc<ContributionRegistries>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            storage,
            capabilities,
            contributions,
            events,
            manifests: RwLock::new(BTreeMap::new()),
            locks: PluginLocks::new(),
            rebuild_lock: AsyncMutex::new(()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // ========================================================================
    // 매니페스트
    // ========================================================================

    pub fn manifest(&self, name: &str) -> Option<PluginManifest> {
        self.manifests.read().get(name).cloned()
    }

    /// 등록된 모든 매니페스트 (이름 순)
    pub fn manifests(&self) -> Vec<PluginManifest> {
        self.manifests.read().values().cloned().collect()
    }

    /// `names` 에 없는 플러그인의 매니페스트와 기능 부여를 제거
    ///
    /// 재스캔에서 사라지거나 제외된 플러그인은 더 이상 수집 대상이 아니다.
    pub(crate) fn retain_manifests(&self, names: &BTreeSet<String>) {
        let mut manifests = self.manifests.write();
        let stale: Vec<String> = manifests
            .keys()
            .filter(|name| !names.contains(*name))
            .cloned()
            .collect();

        for name in stale {
            debug!(plugin = %name, "Dropping manifest no longer discovered");
            manifests.remove(&name);
            self.capabilities.revoke(&name);
        }
    }

    /// 등록된 매니페스트 기준 의존성 그래프
    pub fn resolver(&self) -> DependencyResolver {
        let manifests = self.manifests.read();
        DependencyResolver::new(manifests.values())
    }

    // ========================================================================
    // Discovered → Registered
    // ========================================================================

    /// 매니페스트 등록
    ///
    /// 레코드가 없으면 Registered 로 생성하고 `PluginRegistered` 를 발행한다.
    /// 재발견이면 상태를 유지한 채 버전/경로/기능만 갱신하고, 버전이 바뀐 경우
    /// `PluginUpdated` 를 발행한다. 기능 부여는 매번 교체된다.
    pub async fn register(&self, manifest: PluginManifest, path: &Path) -> Result<RegisterOutcome> {
        let lock = self.locks.lock_for(&manifest.name);
        let _guard = lock.lock().await;

        let registration = PluginRegistration {
            name: manifest.name.clone(),
            version: manifest.version.to_string(),
            path: path.to_path_buf(),
            capabilities: manifest.capabilities.iter().copied().collect(),
        };
        let outcome = self.storage.register_plugin(&registration)?;

        self.capabilities
            .register_capabilities(&manifest.name, manifest.capabilities.iter().copied());
        self.manifests
            .write()
            .insert(manifest.name.clone(), manifest.clone());

        match &outcome {
            RegisterOutcome::Created => {
                info!(plugin = %manifest.name, version = %manifest.version, "Plugin registered");
                self.events
                    .publish(PluginEvent::registered(
                        &manifest.name,
                        manifest.version.to_string(),
                    ))
                    .await;
            }
            RegisterOutcome::Updated { previous_version } => {
                info!(
                    plugin = %manifest.name,
                    from = %previous_version,
                    to = %manifest.version,
                    "Plugin updated"
                );
                self.events
                    .publish(PluginEvent::updated(
                        &manifest.name,
                        previous_version,
                        manifest.version.to_string(),
                    ))
                    .await;
            }
            RegisterOutcome::Unchanged => {
                debug!(plugin = %manifest.name, "Plugin re-discovered");
            }
        }

        Ok(outcome)
    }

    // ========================================================================
    // → Enabled
    // ========================================================================

    /// 플러그인 활성화
    ///
    /// 이미 Enabled 면 아무 것도 하지 않는다. 실패 시 상태는 바뀌지 않는다.
    /// 직접 의존 대상의 락을 끝까지 쥐고 있으므로 그 사이 의존 대상이 꺼지지 않는다.
    pub async fn enable(&self, name: &str, actor: Actor) -> Result<PluginRecord> {
        let guards = self
            .lock_stable(|| {
                let mut names: BTreeSet<String> = self
                    .manifests
                    .read()
                    .get(name)
                    .map(|m| m.dependencies.keys().cloned().collect())
                    .unwrap_or_default();
                names.insert(name.to_string());
                names
            })
            .await;

        let record = self.storage.require_plugin(name)?;
        if record.state == PluginState::Enabled {
            debug!(plugin = name, "Already enabled");
            return Ok(record);
        }

        let from = record.state;
        if !from.can_transition_to(PluginState::Enabled) {
            let reason = match from {
                PluginState::Faulted => "faulted plugins must be disabled before re-enabling",
                _ => "plugin is not registered",
            };
            return Err(Error::transition(name, from, PluginState::Enabled, reason));
        }

        let manifest = self
            .manifest(name)
            .ok_or_else(|| Error::NotFound(format!("manifest for plugin '{}'", name)))?;

        // 의존성: 모두 Enabled 이고 버전 범위를 만족해야 한다
        let records = self.storage.list_plugins()?;
        let installed = installed_from_records(&records);
        let violations = validate_dependencies(&manifest, &installed, &self.resolver());
        if !violations.is_empty() {
            return Err(Error::Dependencies {
                plugin: name.to_string(),
                violations,
            });
        }

        // 자기 기여물이 오류 없이 수집되는지 미리 확인
        self.contributions.dry_run(name, &self.capabilities)?;

        if !self
            .storage
            .transition_state(name, from, PluginState::Enabled, None)?
        {
            return Err(Error::transition(
                name,
                from,
                PluginState::Enabled,
                "state changed concurrently",
            ));
        }

        info!(plugin = name, from = %from, actor = %actor, "Plugin enabled");
        self.events
            .publish(PluginEvent::enabled(name, from, actor))
            .await;

        let report = self.rebuild_logged().await;
        drop(guards);
        self.fault_failed(&report).await;

        if let Some(failure) = report.failure_for(name) {
            return Err(Error::runtime_fault(name, failure.error.to_string()));
        }

        self.storage.require_plugin(name)
    }

    // ========================================================================
    // → Disabled
    // ========================================================================

    /// 플러그인 비활성화
    ///
    /// Enabled 인 의존 플러그인이 있으면 `cascade` 없이는 실패한다. cascade 면
    /// 의존 플러그인을 가장 깊은 것부터 먼저 끈다. 상태 기록은 한 트랜잭션이라
    /// 일부만 꺼지는 일은 없다. 실제로 비활성화된 플러그인을 순서대로 돌려준다
    /// (이미 Disabled 면 빈 목록).
    pub async fn disable(&self, name: &str, cascade: bool, actor: Actor) -> Result<Vec<String>> {
        let guards = self
            .lock_stable(|| {
                let mut names: BTreeSet<String> =
                    self.resolver().dependents_of(name).into_iter().collect();
                names.insert(name.to_string());
                names
            })
            .await;

        let record = self.storage.require_plugin(name)?;
        if record.state == PluginState::Disabled {
            debug!(plugin = name, "Already disabled");
            return Ok(Vec::new());
        }

        let from = record.state;
        if !from.can_transition_to(PluginState::Disabled) {
            return Err(Error::transition(
                name,
                from,
                PluginState::Disabled,
                "only enabled or faulted plugins can be disabled",
            ));
        }

        let enabled: BTreeSet<String> = self
            .storage
            .plugins_in_state(PluginState::Enabled)?
            .into_iter()
            .map(|r| r.name)
            .collect();
        let dependents: Vec<String> = self
            .resolver()
            .dependents_of(name)
            .into_iter()
            .filter(|d| enabled.contains(d))
            .collect();

        if !dependents.is_empty() && !cascade {
            return Err(Error::transition(
                name,
                from,
                PluginState::Disabled,
                format!("enabled dependents: {}", dependents.join(", ")),
            ));
        }

        let mut steps: Vec<(&str, PluginState, PluginState)> = dependents
            .iter()
            .map(|dependent| (dependent.as_str(), PluginState::Enabled, PluginState::Disabled))
            .collect();
        steps.push((name, from, PluginState::Disabled));

        if !self.storage.transition_many(&steps)? {
            return Err(Error::transition(
                name,
                from,
                PluginState::Disabled,
                "state changed concurrently",
            ));
        }

        let mut disabled = Vec::with_capacity(dependents.len() + 1);
        for dependent in dependents {
            info!(plugin = %dependent, cause = name, "Plugin disabled (cascade)");
            self.events
                .publish(
                    PluginEvent::disabled(&dependent, PluginState::Enabled, actor.clone())
                        .with_reason(format!("cascade: {} disabled", name)),
                )
                .await;
            disabled.push(dependent);
        }

        info!(plugin = name, from = %from, actor = %actor, "Plugin disabled");
        self.events
            .publish(PluginEvent::disabled(name, from, actor))
            .await;
        disabled.push(name.to_string());

        let report = self.rebuild_logged().await;
        drop(guards);
        self.fault_failed(&report).await;

        Ok(disabled)
    }

    // ========================================================================
    // Enabled → Faulted
    // ========================================================================

    /// 플러그인을 Faulted 로 전이하고 기여물을 다시 수집
    pub async fn fault(&self, name: &str, reason: &str) -> Result<PluginRecord> {
        let lock = self.locks.lock_for(name);
        let guard = lock.lock().await;

        let record = self.storage.require_plugin(name)?;
        if record.state != PluginState::Enabled {
            return Err(Error::transition(
                name,
                record.state,
                PluginState::Faulted,
                "only enabled plugins can fault",
            ));
        }

        if !self.mark_faulted(name, reason).await? {
            return Err(Error::transition(
                name,
                PluginState::Enabled,
                PluginState::Faulted,
                "state changed concurrently",
            ));
        }

        let report = self.rebuild_logged().await;
        drop(guard);
        self.fault_failed(&report).await;

        self.storage.require_plugin(name)
    }

    /// Enabled 인 경우에만 Faulted 로 전이 (재수집 없음)
    ///
    /// 부팅 검증과 재수집 실패 처리에서 쓰인다. 전이했으면 `true`.
    pub(crate) async fn fault_if_enabled(&self, name: &str, reason: &str) -> Result<bool> {
        let lock = self.locks.lock_for(name);
        let _guard = lock.lock().await;
        self.mark_faulted(name, reason).await
    }

    async fn mark_faulted(&self, name: &str, reason: &str) -> Result<bool> {
        let changed = self.storage.transition_state(
            name,
            PluginState::Enabled,
            PluginState::Faulted,
            Some(reason),
        )?;

        if changed {
            warn!(plugin = name, reason, "Plugin faulted");
            self.events.publish(PluginEvent::faulted(name, reason)).await;
        }
        Ok(changed)
    }

    /// 재수집에서 실패한 플러그인을 Faulted 로 전이
    async fn fault_failed(&self, report: &CollectionReport) {
        for plugin in report.failed_plugins() {
            let Some(failure) = report.failure_for(&plugin) else {
                continue;
            };
            let reason = format!("{}: {}", REASON_CONTRIBUTION_FAILED, failure.error);
            if let Err(e) = self.fault_if_enabled(&plugin, &reason).await {
                error!(plugin = %plugin, error = %e, "Failed to fault plugin after collection failure");
            }
        }
    }

    /// `names` 가 돌려주는 플러그인들의 락을 획득
    ///
    /// 기다리는 동안 매니페스트가 바뀌어 집합이 달라졌으면 다시 잡는다.
    async fn lock_stable(&self, names: impl Fn() -> BTreeSet<String>) -> Vec<OwnedMutexGuard<()>> {
        loop {
            let wanted = names();
            let guards = self.locks.lock_all(wanted.iter().map(String::as_str)).await;
            if names() == wanted {
                return guards;
            }
            debug!(plugins = ?wanted, "Lock set changed while waiting, retrying");
        }
    }

    // ========================================================================
    // 재수집
    // ========================================================================

    /// Enabled 플러그인 이름 (활성화 순서)
    pub fn enabled_in_order(&self) -> Result<Vec<String>> {
        let enabled: BTreeSet<String> = self
            .storage
            .plugins_in_state(PluginState::Enabled)?
            .into_iter()
            .map(|r| r.name)
            .collect();

        let manifests = self.manifests.read();
        let resolver = DependencyResolver::new(
            manifests
                .values()
                .filter(|m| enabled.contains(&m.name)),
        );
        drop(manifests);

        match resolver.compute_activation_order() {
            Ok(order) => Ok(order),
            Err(e) => {
                warn!(error = %e, "Falling back to name order for enabled plugins");
                Ok(enabled
                    .into_iter()
                    .filter(|name| self.manifests.read().contains_key(name))
                    .collect())
            }
        }
    }

    /// 모든 기여물 레지스트리 재수집
    ///
    /// 실패한 플러그인의 항목은 게시된 스냅샷에 포함되지 않는다. 상태 전이는
    /// 호출자가 결정한다.
    pub async fn rebuild(&self) -> Result<CollectionReport> {
        let _rebuild = self.rebuild_lock.lock().await;
        let enabled = self.enabled_in_order()?;
        let report = self.contributions.collect(&enabled, &self.capabilities);

        debug!(
            enabled = enabled.len(),
            items = report.total(),
            failures = report.failures.len(),
            "Contribution registries rebuilt"
        );
        Ok(report)
    }

    /// 재수집 후 실패한 플러그인을 Faulted 로 전이
    pub async fn rebuild_and_fault(&self) -> Result<CollectionReport> {
        let report = self.rebuild().await?;
        self.fault_failed(&report).await;
        Ok(report)
    }

    async fn rebuild_logged(&self) -> CollectionReport {
        match self.rebuild().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Contribution rebuild failed");
                CollectionReport::default()
            }
        }
    }
}
