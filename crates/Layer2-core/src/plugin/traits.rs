//! Plugin traits - 핵심 플러그인 인터페이스
//!
//! 플러그인 코드는 컴파일 시점에 링크되고, `on_load` 에서 `PluginContext` 로
//! 기여물 provider 와 헬스 체크 훅을 명시적으로 바인딩한다.

use super::contribution::{
    ConsoleCommand, Contribution, ContributionProvider, CronTask, ProviderSet, Route, ServerTab,
    Widget,
};
use super::health::HealthCheckResult;
use async_trait::async_trait;
use gamepanel_foundation::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// HealthCheck - 헬스 체크 훅
// ============================================================================

/// 플러그인 자체 점검
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<HealthCheckResult>;
}

// ============================================================================
// PluginContext - 플러그인에 제공되는 컨텍스트
// ============================================================================

/// 플러그인 컨텍스트 - 바인딩 시점에 플러그인이 런타임과 상호작용하는 인터페이스
pub struct PluginContext {
    /// 플러그인 이름
    plugin: String,

    /// 플러그인 디렉토리
    plugin_dir: PathBuf,

    /// 바인딩된 provider
    providers: ProviderSet,

    /// 헬스 체크 훅
    health_check: Option<Arc<dyn HealthCheck>>,
}

impl PluginContext {
    /// 새 컨텍스트 생성
    pub fn new(plugin: impl Into<String>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin: plugin.into(),
            plugin_dir: plugin_dir.into(),
            providers: ProviderSet::new(),
            health_check: None,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    // ========================================================================
    // Provider 바인딩
    // ========================================================================

    /// 임의 종류의 provider 바인딩
    pub fn provide<T: Contribution>(&mut self, provider: impl ContributionProvider<T> + 'static) {
        self.providers.push::<T>(Arc::new(provider));
    }

    pub fn register_routes(&mut self, provider: impl ContributionProvider<Route> + 'static) {
        self.provide::<Route>(provider);
    }

    pub fn register_commands(
        &mut self,
        provider: impl ContributionProvider<ConsoleCommand> + 'static,
    ) {
        self.provide::<ConsoleCommand>(provider);
    }

    pub fn register_cron(&mut self, provider: impl ContributionProvider<CronTask> + 'static) {
        self.provide::<CronTask>(provider);
    }

    pub fn register_widgets(&mut self, provider: impl ContributionProvider<Widget> + 'static) {
        self.provide::<Widget>(provider);
    }

    pub fn register_tabs(&mut self, provider: impl ContributionProvider<ServerTab> + 'static) {
        self.provide::<ServerTab>(provider);
    }

    // ========================================================================
    // 헬스 체크
    // ========================================================================

    /// 헬스 체크 훅 설정 (마지막 설정이 유효)
    pub fn set_health_check(&mut self, hook: impl HealthCheck + 'static) {
        self.health_check = Some(Arc::new(hook));
    }

    pub fn has_health_check(&self) -> bool {
        self.health_check.is_some()
    }

    /// 바인딩 결과 분리
    pub(crate) fn into_parts(self) -> (ProviderSet, Option<Arc<dyn HealthCheck>>) {
        (self.providers, self.health_check)
    }
}

// ============================================================================
// Plugin Trait - 모든 플러그인이 구현해야 하는 인터페이스
// ============================================================================

/// 플러그인 트레이트
///
/// `name()` 은 `plugin.json` 의 `name` 과 같아야 바인딩이 매니페스트와 연결된다.
pub trait Plugin: Send + Sync {
    /// 매니페스트 이름 (slug)
    fn name(&self) -> &str;

    /// 플러그인 로드 시 호출
    ///
    /// 여기서 기여물 provider 와 헬스 체크 훅을 등록한다. 실행은 수집/점검
    /// 시점까지 미뤄진다.
    fn on_load(&self, ctx: &mut PluginContext) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BillingPlugin;

    impl Plugin for BillingPlugin {
        fn name(&self) -> &str {
            "billing"
        }

        fn on_load(&self, ctx: &mut PluginContext) -> Result<()> {
            ctx.register_routes(|| -> Result<Vec<Route>> { Ok(vec![Route::get("/billing")]) });
            ctx.register_cron(|| -> Result<Vec<CronTask>> {
                Ok(vec![CronTask::new("billing:invoices", "0 3 * * *")])
            });
            Ok(())
        }
    }

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthCheck for AlwaysHealthy {
        async fn check(&self) -> Result<HealthCheckResult> {
            Ok(HealthCheckResult::healthy())
        }
    }

    #[test]
    fn test_plugin_binds_providers() {
        let plugin = BillingPlugin;
        let mut ctx = PluginContext::new(plugin.name(), "/srv/plugins/billing");
        plugin.on_load(&mut ctx).unwrap();

        assert_eq!(ctx.plugin(), "billing");
        assert!(!ctx.has_health_check());

        let (providers, health) = ctx.into_parts();
        assert!(!providers.is_empty());
        assert!(health.is_none());
    }

    #[tokio::test]
    async fn test_health_hook_binding() {
        let mut ctx = PluginContext::new("billing", "/srv/plugins/billing");
        ctx.set_health_check(AlwaysHealthy);
        assert!(ctx.has_health_check());

        let (providers, health) = ctx.into_parts();
        assert!(providers.is_empty());
        let result = health.unwrap().check().await.unwrap();
        assert!(result.healthy);
    }
}
