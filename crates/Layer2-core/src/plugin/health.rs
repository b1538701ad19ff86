//! Health Check Service - Enabled 플러그인 주기 점검
//!
//! 각 훅은 별도 태스크에서 플러그인별 타임아웃(남은 전체 상한으로 잘림) 안에
//! 실행된다. 오류, 패닉, 타임아웃은 모두 unhealthy 로 기록되고 호출자에게
//! 전파되지 않는다. 연속 실패가 임계값에 닿으면 Faulted 로 전이한다.
//! 연속 실패 수는 플러그인이 Enabled 에 들어오거나 떠날 때 0 으로 돌아간다.

use super::events::{EventType, PluginEvent, PluginEventHandler};
use super::lifecycle::{PluginLifecycle, REASON_HEALTH_CHECK_FAILED};
use super::traits::HealthCheck;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use gamepanel_foundation::{HealthSettings, PluginState};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// HealthCheckResult
// ============================================================================

/// 한 번의 점검 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub errors: Vec<String>,
    /// 0..=100
    pub health_percentage: u8,
}

impl HealthCheckResult {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            errors: Vec::new(),
            health_percentage: 100,
        }
    }

    pub fn unhealthy(errors: Vec<String>) -> Self {
        Self {
            healthy: false,
            errors,
            health_percentage: 0,
        }
    }

    /// 일부 점검만 통과 (0 이면 unhealthy)
    pub fn partial(health_percentage: u8, errors: Vec<String>) -> Self {
        let health_percentage = health_percentage.min(100);
        Self {
            healthy: health_percentage > 0,
            errors,
            health_percentage,
        }
    }
}

/// 플러그인별 최신 점검 상태
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginHealth {
    pub plugin: String,
    pub result: HealthCheckResult,
    pub consecutive_failures: u32,
    pub checked_at: DateTime<Utc>,
}

/// 한 번의 전체 점검 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: BTreeMap<String, PluginHealth>,
    /// 이번 실행에서 Faulted 로 전이된 플러그인
    pub faulted: Vec<String>,
}

impl HealthReport {
    fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            results: BTreeMap::new(),
            faulted: Vec::new(),
        }
    }

    pub fn healthy_count(&self) -> usize {
        self.results.values().filter(|h| h.result.healthy).count()
    }

    pub fn unhealthy_count(&self) -> usize {
        self.results.len() - self.healthy_count()
    }
}

// ============================================================================
// Config
// ============================================================================

/// 점검 설정
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// 플러그인별 타임아웃
    pub timeout: Duration,

    /// 한 번의 전체 실행 상한
    pub ceiling: Duration,

    /// Faulted 전이까지의 연속 실패 수
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self::from(&HealthSettings::default())
    }
}

impl From<&HealthSettings> for HealthCheckConfig {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            ceiling: settings.ceiling(),
            failure_threshold: settings.failure_threshold,
        }
    }
}

impl HealthCheckConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }
}

type HealthTable = Arc<Mutex<HashMap<String, PluginHealth>>>;

// ============================================================================
// HealthResetHandler
// ============================================================================

/// 활성화/비활성화/Faulted 전이 때 연속 실패 수 초기화
pub struct HealthResetHandler {
    latest: HealthTable,
}

impl HealthResetHandler {
    pub const NAME: &'static str = "health-reset";
}

#[async_trait]
impl PluginEventHandler for HealthResetHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn interested_events(&self) -> Vec<EventType> {
        vec![
            EventType::PluginEnabled,
            EventType::PluginDisabled,
            EventType::PluginFaulted,
        ]
    }

    async fn handle(&self, event: &PluginEvent) {
        if let Some(health) = self.latest.lock().get_mut(&event.plugin) {
            if health.consecutive_failures > 0 {
                debug!(
                    plugin = %event.plugin,
                    event = %event.event_type(),
                    "Resetting health failure count"
                );
                health.consecutive_failures = 0;
            }
        }
    }
}

// ============================================================================
// HealthCheckService
// ============================================================================

/// 헬스 체크 서비스
pub struct HealthCheckService {
    lifecycle: Arc<PluginLifecycle>,
    config: HealthCheckConfig,

    /// 플러그인 → 훅
    hooks: RwLock<BTreeMap<String, Arc<dyn HealthCheck>>>,

    /// 플러그인 → 최신 상태
    latest: HealthTable,
}

impl HealthCheckService {
    pub fn new(lifecycle: Arc<PluginLifecycle>, config: HealthCheckConfig) -> Self {
        Self {
            lifecycle,
            config,
            hooks: RwLock::new(BTreeMap::new()),
            latest: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 이벤트 버스에 등록할 초기화 핸들러
    pub fn event_handler(&self) -> Arc<dyn PluginEventHandler> {
        Arc::new(HealthResetHandler {
            latest: self.latest.clone(),
        })
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    pub fn register_hook(&self, plugin: &str, hook: Arc<dyn HealthCheck>) {
        self.hooks.write().insert(plugin.to_string(), hook);
    }

    pub fn remove_hook(&self, plugin: &str) {
        self.hooks.write().remove(plugin);
        self.latest.lock().remove(plugin);
    }

    pub fn has_hook(&self, plugin: &str) -> bool {
        self.hooks.read().contains_key(plugin)
    }

    /// 최신 점검 상태
    pub fn latest(&self, plugin: &str) -> Option<PluginHealth> {
        self.latest.lock().get(plugin).cloned()
    }

    pub fn consecutive_failures(&self, plugin: &str) -> u32 {
        self.latest
            .lock()
            .get(plugin)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    /// 훅이 있는 모든 Enabled 플러그인 점검
    pub async fn run_all_health_checks(&self) -> HealthReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.config.ceiling;

        let enabled = match self.lifecycle.storage().plugins_in_state(PluginState::Enabled) {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Health check skipped: cannot list enabled plugins");
                return HealthReport::empty(started_at);
            }
        };

        let targets: Vec<(String, Arc<dyn HealthCheck>)> = {
            let hooks = self.hooks.read();
            enabled
                .into_iter()
                .filter_map(|record| {
                    hooks
                        .get(&record.name)
                        .map(|hook| (record.name, Arc::clone(hook)))
                })
                .collect()
        };

        let checks = targets.into_iter().map(|(plugin, hook)| {
            let budget = self
                .config
                .timeout
                .min(deadline.saturating_duration_since(Instant::now()));
            async move {
                let result = run_hook(&plugin, hook, budget).await;
                (plugin, result)
            }
        });
        let results = join_all(checks).await;

        let mut report = HealthReport::empty(started_at);
        for (plugin, result) in results {
            let (health, reached_threshold) = self.record(&plugin, result);
            report.results.insert(plugin.clone(), health);

            if reached_threshold {
                match self.lifecycle.fault(&plugin, REASON_HEALTH_CHECK_FAILED).await {
                    Ok(_) => report.faulted.push(plugin),
                    Err(e) => warn!(plugin = %plugin, error = %e, "Could not fault unhealthy plugin"),
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            checked = report.results.len(),
            unhealthy = report.unhealthy_count(),
            faulted = report.faulted.len(),
            "Completed health check cycle"
        );
        report
    }

    /// 결과 기록, 임계값 도달 여부 반환
    fn record(&self, plugin: &str, result: HealthCheckResult) -> (PluginHealth, bool) {
        let mut latest = self.latest.lock();
        let previous = latest.get(plugin).map(|h| h.consecutive_failures).unwrap_or(0);

        let consecutive_failures = if result.healthy { 0 } else { previous + 1 };
        if !result.healthy {
            warn!(
                plugin,
                failures = consecutive_failures,
                errors = ?result.errors,
                "Health check failed"
            );
        }

        let health = PluginHealth {
            plugin: plugin.to_string(),
            result,
            consecutive_failures,
            checked_at: Utc::now(),
        };
        latest.insert(plugin.to_string(), health.clone());

        (health, consecutive_failures >= self.config.failure_threshold)
    }

    /// 주기 점검 시작 (백그라운드 태스크)
    ///
    /// 첫 점검은 한 주기 뒤에 실행된다. 핸들을 abort 하면 멈춘다.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Starting periodic health checks");
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            timer.tick().await;

            loop {
                timer.tick().await;
                self.run_all_health_checks().await;
            }
        })
    }
}

/// 훅 하나를 별도 태스크에서 실행
async fn run_hook(plugin: &str, hook: Arc<dyn HealthCheck>, budget: Duration) -> HealthCheckResult {
    let mut handle = tokio::spawn(async move { hook.check().await });

    match tokio::time::timeout(budget, &mut handle).await {
        Ok(Ok(Ok(result))) => result,
        Ok(Ok(Err(e))) => HealthCheckResult::unhealthy(vec![e.to_string()]),
        Ok(Err(join_error)) if join_error.is_panic() => {
            HealthCheckResult::unhealthy(vec!["health check panicked".to_string()])
        }
        Ok(Err(join_error)) => HealthCheckResult::unhealthy(vec![join_error.to_string()]),
        Err(_) => {
            handle.abort();
            debug!(plugin, budget_ms = budget.as_millis() as u64, "Health check timed out");
            HealthCheckResult::unhealthy(vec![format!(
                "health check timed out after {}ms",
                budget.as_millis()
            )])
        }
    }
}
