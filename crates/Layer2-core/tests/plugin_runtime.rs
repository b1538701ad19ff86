//! Plugin runtime 통합 테스트
//!
//! 파일시스템의 플러그인 루트에서 부팅해 운영자 동작, 기여물 수집,
//! 헬스 체크, 감사 기록까지 전체 흐름을 검증한다.

use async_trait::async_trait;
use gamepanel_core::plugin::{
    EventBus, HealthCheckConfig, PluginDiscovery, REASON_HEALTH_CHECK_FAILED,
};
use gamepanel_core::{
    HealthCheck, HealthCheckResult, Plugin, PluginContext, PluginManager, PluginManagerConfig,
    PluginManifest, RequestContext, Route, Widget,
};
use gamepanel_foundation::{
    Actor, Capability, DependencyViolation, Error, PluginState, Result,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

fn write_plugin(root: &Path, name: &str, version: &str, capabilities: &[&str], deps: &[(&str, &str)]) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();

    let capabilities: Vec<String> = capabilities.iter().map(|c| format!("\"{}\"", c)).collect();
    let deps: Vec<String> = deps
        .iter()
        .map(|(dep, req)| format!("\"{}\":\"{}\"", dep, req))
        .collect();

    std::fs::write(
        dir.join("plugin.json"),
        format!(
            r#"{{"name":"{}","version":"{}","capabilities":[{}],"dependencies":{{{}}}}}"#,
            name,
            version,
            capabilities.join(","),
            deps.join(",")
        ),
    )
    .unwrap();
}

async fn manager(root: &Path, health: HealthCheckConfig) -> PluginManager {
    PluginManager::in_memory(
        PluginManagerConfig::default()
            .with_plugin_root(root)
            .with_health(health),
    )
    .await
    .unwrap()
}

/// 이름과 같은 경로의 라우트 하나를 제공하는 플러그인
struct RoutePlugin(&'static str);

impl Plugin for RoutePlugin {
    fn name(&self) -> &str {
        self.0
    }

    fn on_load(&self, ctx: &mut PluginContext) -> Result<()> {
        let path = format!("/{}", self.0);
        ctx.register_routes(move || -> Result<Vec<Route>> { Ok(vec![Route::get(path.clone())]) });
        Ok(())
    }
}

/// UI 기능만 선언했지만 라우트와 위젯 provider 를 둘 다 등록하는 플러그인
struct ThemePlugin;

impl Plugin for ThemePlugin {
    fn name(&self) -> &str {
        "theme"
    }

    fn on_load(&self, ctx: &mut PluginContext) -> Result<()> {
        ctx.register_routes(|| -> Result<Vec<Route>> { Ok(vec![Route::get("/theme/css")]) });
        ctx.register_widgets(|| -> Result<Vec<Widget>> {
            Ok(vec![Widget::new("theme-preview", "Theme preview")])
        });
        Ok(())
    }
}

struct AlwaysFailing;

#[async_trait]
impl HealthCheck for AlwaysFailing {
    async fn check(&self) -> Result<HealthCheckResult> {
        Ok(HealthCheckResult::unhealthy(vec!["upstream unreachable".to_string()]))
    }
}

struct FlakyPlugin;

impl Plugin for FlakyPlugin {
    fn name(&self) -> &str {
        "flaky"
    }

    fn on_load(&self, ctx: &mut PluginContext) -> Result<()> {
        ctx.set_health_check(AlwaysFailing);
        Ok(())
    }
}

// ============================================================================
// Dependencies
// ============================================================================

#[tokio::test]
async fn test_enable_rejects_unsatisfied_version() {
    let temp = TempDir::new().unwrap();
    write_plugin(temp.path(), "core-analytics", "1.1.0", &["routes"], &[]);
    write_plugin(
        temp.path(),
        "reports",
        "1.0.0",
        &["routes"],
        &[("core-analytics", ">=1.2.0")],
    );

    let manager = manager(temp.path(), HealthCheckConfig::default()).await;
    manager.boot().await.unwrap();
    manager
        .enable("core-analytics", Actor::user("7"))
        .await
        .unwrap();

    let err = manager.enable("reports", Actor::user("7")).await.unwrap_err();
    match &err {
        Error::Dependencies { plugin, violations } => {
            assert_eq!(plugin, "reports");
            assert_eq!(
                violations,
                &vec![DependencyViolation::VersionMismatch {
                    dependency: "core-analytics".to_string(),
                    required: ">=1.2.0".to_string(),
                    installed: "1.1.0".to_string(),
                }]
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains(">=1.2.0"));
    assert!(message.contains("1.1.0"));

    assert_eq!(
        manager.status("reports").unwrap().record.state,
        PluginState::Registered
    );
}

#[tokio::test]
async fn test_discovery_rejects_cycle() {
    let temp = TempDir::new().unwrap();
    write_plugin(temp.path(), "a", "1.0.0", &[], &[("b", "*")]);
    write_plugin(temp.path(), "b", "1.0.0", &[], &[("a", "*")]);
    write_plugin(temp.path(), "c", "1.0.0", &[], &[]);

    let report = PluginDiscovery::new(temp.path(), Arc::new(EventBus::new()))
        .discover()
        .await;

    assert_eq!(report.names(), vec!["c"]);
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(report.cycles[0].cycle, vec!["a", "b", "a"]);

    for name in ["a", "b"] {
        let rejected = report.rejected_for(name).unwrap();
        assert!(matches!(
            &rejected.error,
            Error::CircularDependency { cycle } if cycle == &vec!["a", "b", "a"]
        ));
    }
}

// ============================================================================
// Contributions
// ============================================================================

#[tokio::test]
async fn test_undeclared_capability_contributes_nothing() {
    let temp = TempDir::new().unwrap();
    write_plugin(temp.path(), "theme", "1.0.0", &["ui", "widgets"], &[]);
    write_plugin(temp.path(), "billing", "1.0.0", &["routes"], &[]);

    let manager = manager(temp.path(), HealthCheckConfig::default()).await;
    manager.bind(&ThemePlugin).unwrap();
    manager.bind(&RoutePlugin("billing")).unwrap();
    manager.boot().await.unwrap();

    manager.enable("theme", Actor::System).await.unwrap();
    manager.enable("billing", Actor::System).await.unwrap();

    let routes = manager.contributions().routes.items();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].path, "/billing");
    assert!(manager.contributions().routes.by_owner("theme").is_empty());

    // 선언한 종류는 그대로 수집된다
    let widgets = manager
        .contributions()
        .widgets
        .visible(&RequestContext::user("3"));
    assert_eq!(widgets.len(), 1);

    let report = manager.lifecycle().rebuild().await.unwrap();
    assert!(report.is_clean());
    let denied = report.denied.iter().find(|d| d.plugin == "theme").unwrap();
    assert!(matches!(
        denied.error,
        Error::Capability {
            capability: Capability::Routes,
            ..
        }
    ));

    // 기능 누락은 Faulted 사유가 아니다
    assert_eq!(
        manager.status("theme").unwrap().record.state,
        PluginState::Enabled
    );
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_threshold_faults_and_audits() {
    let temp = TempDir::new().unwrap();
    write_plugin(temp.path(), "flaky", "1.0.0", &[], &[]);

    let manager = manager(
        temp.path(),
        HealthCheckConfig::default().with_failure_threshold(3),
    )
    .await;
    manager.bind(&FlakyPlugin).unwrap();
    manager.boot().await.unwrap();
    manager.enable("flaky", Actor::user("1")).await.unwrap();

    for _ in 0..2 {
        let report = manager.run_health_checks().await;
        assert!(report.faulted.is_empty());
    }
    assert_eq!(manager.health().consecutive_failures("flaky"), 2);

    let report = manager.run_health_checks().await;
    assert_eq!(report.faulted, vec!["flaky"]);

    let status = manager.status("flaky").unwrap();
    assert_eq!(status.record.state, PluginState::Faulted);
    assert_eq!(
        status.record.fault_reason.as_deref(),
        Some(REASON_HEALTH_CHECK_FAILED)
    );

    let records = manager.audit().for_plugin("flaky").await.unwrap();
    let fault = records
        .iter()
        .find(|r| r.to_state == PluginState::Faulted)
        .unwrap();
    assert_eq!(fault.from_state, PluginState::Enabled);
    assert_eq!(fault.actor, Actor::System);
    assert_eq!(fault.reason.as_deref(), Some("health_check_failed"));

    // Faulted 플러그인은 더 이상 점검되지 않는다
    let report = manager.run_health_checks().await;
    assert!(report.results.is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_health_failures_restart_after_reenable() {
    let temp = TempDir::new().unwrap();
    write_plugin(temp.path(), "flaky", "1.0.0", &[], &[]);

    let manager = manager(
        temp.path(),
        HealthCheckConfig::default().with_failure_threshold(3),
    )
    .await;
    manager.bind(&FlakyPlugin).unwrap();
    manager.boot().await.unwrap();
    manager.enable("flaky", Actor::user("1")).await.unwrap();

    manager.run_health_checks().await;
    manager.run_health_checks().await;
    manager.disable("flaky", false, Actor::user("1")).await.unwrap();
    manager.enable("flaky", Actor::user("1")).await.unwrap();

    let report = manager.run_health_checks().await;
    assert!(report.faulted.is_empty());
    assert_eq!(manager.health().consecutive_failures("flaky"), 1);
    assert_eq!(
        manager.status("flaky").unwrap().record.state,
        PluginState::Enabled
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_enables_audit_one_transition() {
    let temp = TempDir::new().unwrap();
    write_plugin(temp.path(), "billing", "1.0.0", &["routes"], &[]);

    let manager = Arc::new(manager(temp.path(), HealthCheckConfig::default()).await);
    manager.bind(&RoutePlugin("billing")).unwrap();
    manager.boot().await.unwrap();

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.enable("billing", Actor::user(i.to_string())).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().state, PluginState::Enabled);
    }

    let records = manager.audit().for_plugin("billing").await.unwrap();
    let enables: Vec<_> = records
        .iter()
        .filter(|r| r.to_state == PluginState::Enabled)
        .collect();
    assert_eq!(enables.len(), 1);
    assert_eq!(enables[0].from_state, PluginState::Registered);
    assert_eq!(manager.contributions().routes.len(), 1);
}

#[tokio::test]
async fn test_enable_is_idempotent() {
    let temp = TempDir::new().unwrap();
    write_plugin(temp.path(), "billing", "1.0.0", &["routes"], &[]);

    let manager = manager(temp.path(), HealthCheckConfig::default()).await;
    manager.bind(&RoutePlugin("billing")).unwrap();
    manager.boot().await.unwrap();

    manager.enable("billing", Actor::user("1")).await.unwrap();
    manager.enable("billing", Actor::user("1")).await.unwrap();

    let records = manager.audit().for_plugin("billing").await.unwrap();
    let enables = records
        .iter()
        .filter(|r| r.to_state == PluginState::Enabled)
        .count();
    assert_eq!(enables, 1);
    assert_eq!(manager.contributions().routes.len(), 1);
}

#[tokio::test]
async fn test_cascade_disable_removes_contributions() {
    let temp = TempDir::new().unwrap();
    write_plugin(temp.path(), "core-analytics", "1.3.0", &["routes"], &[]);
    write_plugin(
        temp.path(),
        "reports",
        "1.0.0",
        &["routes"],
        &[("core-analytics", ">=1.2.0")],
    );

    let manager = manager(temp.path(), HealthCheckConfig::default()).await;
    manager.bind(&RoutePlugin("core-analytics")).unwrap();
    manager.bind(&RoutePlugin("reports")).unwrap();
    manager.boot().await.unwrap();
    manager.enable("core-analytics", Actor::System).await.unwrap();
    manager.enable("reports", Actor::System).await.unwrap();
    assert_eq!(manager.contributions().routes.len(), 2);

    let err = manager
        .disable("core-analytics", false, Actor::user("2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StateTransition { .. }));
    assert!(err.to_string().contains("reports"));

    let disabled = manager
        .disable("core-analytics", true, Actor::user("2"))
        .await
        .unwrap();
    assert_eq!(disabled, vec!["reports", "core-analytics"]);
    assert!(manager.contributions().routes.is_empty());

    let cascade = manager.audit().for_plugin("reports").await.unwrap();
    let record = cascade
        .iter()
        .find(|r| r.to_state == PluginState::Disabled)
        .unwrap();
    assert!(record.reason.as_deref().unwrap().contains("core-analytics"));
}

#[tokio::test]
async fn test_enabled_state_survives_restart() {
    let temp = TempDir::new().unwrap();
    let plugins = temp.path().join("plugins");
    write_plugin(&plugins, "billing", "1.0.0", &["routes"], &[]);

    let config = gamepanel_foundation::RuntimeConfig::default()
        .with_plugin_root(&plugins)
        .with_data_dir(temp.path().join("data"));

    {
        let manager = PluginManager::open(&config).await.unwrap();
        manager.boot().await.unwrap();
        manager.enable("billing", Actor::user("5")).await.unwrap();
    }

    let manager = PluginManager::open(&config).await.unwrap();
    manager.bind(&RoutePlugin("billing")).unwrap();
    let report = manager.boot().await.unwrap();

    assert!(report.registered.is_empty());
    assert!(report.faulted.is_empty());
    assert_eq!(
        manager.status("billing").unwrap().record.state,
        PluginState::Enabled
    );
    assert_eq!(manager.contributions().routes.len(), 1);
}

// ============================================================================
// Manifest
// ============================================================================

#[test]
fn test_manifest_json_round_trip() {
    let path = Path::new("plugins/reports/plugin.json");
    let manifest = PluginManifest::from_json(
        r#"{
            "name": "reports",
            "version": "2.1.0",
            "author": "ops",
            "capabilities": ["routes", "widgets", "cron"],
            "dependencies": { "core-analytics": ">=1.2.0" }
        }"#,
        path,
    )
    .unwrap();

    let reparsed = PluginManifest::from_json(&manifest.to_json().unwrap(), path).unwrap();
    assert_eq!(reparsed, manifest);
}
