//! Contribution Registries - 플러그인 기여물 수집
//!
//! 플러그인은 `PluginContext` 를 통해 종류별 `ContributionProvider` 를 바인딩한다.
//! `collect()` 는 Enabled 이면서 해당 기능을 가진 플러그인의 provider 만 호출해
//! 새 스냅샷을 만들고 포인터 교체로 게시한다. 읽는 쪽은 항상 완성된 스냅샷만 본다.
//!
//! ```text
//!  PluginContext ──bind──► ProviderSet ──► ContributionRegistries
//!                                           ├── routes   : ContributionRegistry<Route>
//!                                           ├── commands : ContributionRegistry<ConsoleCommand>
//!                                           ├── cron     : ContributionRegistry<CronTask>
//!                                           ├── widgets  : ContributionRegistry<Widget>
//!                                           └── tabs     : ContributionRegistry<ServerTab>
//! ```

use super::capability::CapabilityRegistry;
use gamepanel_foundation::{Capability, Error, Result};
use parking_lot::RwLock;
use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// RequestContext - 가시성 판단 입력
// ============================================================================

/// 요청 컨텍스트 (위젯/탭 가시성 판단용)
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// 로그인 사용자
    pub user_id: Option<String>,

    /// 관리자 여부
    pub is_admin: bool,

    /// 부여된 권한 키
    pub permissions: BTreeSet<String>,

    /// 현재 보고 있는 서버 (서버 상세 화면)
    pub server_id: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(id)
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// 관리자는 모든 권한을 가진다
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_admin || self.permissions.contains(permission)
    }
}

/// 가시성 술어
pub type VisibilityPredicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

// ============================================================================
// Contribution - 기여물 공통 인터페이스
// ============================================================================

/// 레지스트리에 등록되는 기여물
pub trait Contribution: Clone + Send + Sync + 'static {
    /// 종류 이름 (에러/로그용)
    const KIND: &'static str;

    /// 등록에 필요한 기능
    const CAPABILITY: Capability;

    /// 종류 내 고유 ID
    fn id(&self) -> &str;

    /// 정렬 우선순위 (높을수록 앞)
    fn priority(&self) -> i32 {
        0
    }

    /// 요청 컨텍스트에서 보이는지
    fn is_visible(&self, _ctx: &RequestContext) -> bool {
        true
    }

    #[doc(hidden)]
    fn registry(registries: &ContributionRegistries) -> &ContributionRegistry<Self>;

    #[doc(hidden)]
    fn providers(set: &mut ProviderSet) -> &mut Vec<Arc<dyn ContributionProvider<Self>>>;
}

/// 기여물 팩토리
///
/// 플러그인이 바인딩 시점에 등록하고, 수집 때마다 호출된다.
pub trait ContributionProvider<T: Contribution>: Send + Sync {
    fn provide(&self) -> Result<Vec<T>>;
}

impl<T, F> ContributionProvider<T> for F
where
    T: Contribution,
    F: Fn() -> Result<Vec<T>> + Send + Sync,
{
    fn provide(&self) -> Result<Vec<T>> {
        self()
    }
}

// ============================================================================
// 기여물 종류
// ============================================================================

/// HTTP 메서드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP 라우트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub id: String,
    pub method: HttpMethod,
    pub path: String,
    pub priority: i32,
    pub middleware: Vec<String>,
}

impl Route {
    /// ID 는 기본적으로 `"METHOD path"`
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: format!("{} {}", method, path),
            method,
            path,
            priority: 0,
            middleware: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_middleware(mut self, middleware: impl Into<String>) -> Self {
        self.middleware.push(middleware.into());
        self
    }
}

impl Contribution for Route {
    const KIND: &'static str = "route";
    const CAPABILITY: Capability = Capability::Routes;

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn registry(registries: &ContributionRegistries) -> &ContributionRegistry<Self> {
        &registries.routes
    }

    fn providers(set: &mut ProviderSet) -> &mut Vec<Arc<dyn ContributionProvider<Self>>> {
        &mut set.routes
    }
}

/// 콘솔 명령어 핸들러
pub type CommandHandler = Arc<dyn Fn(&[String]) -> Result<String> + Send + Sync>;

/// 콘솔 명령어
#[derive(Clone)]
pub struct ConsoleCommand {
    pub name: String,
    pub description: String,
    pub priority: i32,
    handler: CommandHandler,
}

impl ConsoleCommand {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl Fn(&[String]) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            priority: 0,
            handler: Arc::new(handler),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 명령어 실행
    pub fn run(&self, args: &[String]) -> Result<String> {
        (self.handler)(args)
    }
}

impl fmt::Debug for ConsoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleCommand")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl Contribution for ConsoleCommand {
    const KIND: &'static str = "console command";
    const CAPABILITY: Capability = Capability::Console;

    fn id(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn registry(registries: &ContributionRegistries) -> &ContributionRegistry<Self> {
        &registries.commands
    }

    fn providers(set: &mut ProviderSet) -> &mut Vec<Arc<dyn ContributionProvider<Self>>> {
        &mut set.commands
    }
}

/// 예약 작업
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronTask {
    pub id: String,
    /// cron 표현식 (예: "0 3 * * *")
    pub schedule: String,
    pub description: Option<String>,
    pub priority: i32,
}

impl CronTask {
    pub fn new(id: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schedule: schedule.into(),
            description: None,
            priority: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Contribution for CronTask {
    const KIND: &'static str = "cron task";
    const CAPABILITY: Capability = Capability::Cron;

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn registry(registries: &ContributionRegistries) -> &ContributionRegistry<Self> {
        &registries.cron
    }

    fn providers(set: &mut ProviderSet) -> &mut Vec<Arc<dyn ContributionProvider<Self>>> {
        &mut set.cron
    }
}

/// 대시보드 위젯
#[derive(Clone)]
pub struct Widget {
    pub id: String,
    pub title: String,
    pub priority: i32,
    visible: Option<VisibilityPredicate>,
}

impl Widget {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority: 0,
            visible: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_visibility(
        mut self,
        predicate: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.visible = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("priority", &self.priority)
            .field("has_visibility", &self.visible.is_some())
            .finish()
    }
}

impl Contribution for Widget {
    const KIND: &'static str = "widget";
    const CAPABILITY: Capability = Capability::Widgets;

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_visible(&self, ctx: &RequestContext) -> bool {
        self.visible.as_ref().map(|p| p(ctx)).unwrap_or(true)
    }

    fn registry(registries: &ContributionRegistries) -> &ContributionRegistry<Self> {
        &registries.widgets
    }

    fn providers(set: &mut ProviderSet) -> &mut Vec<Arc<dyn ContributionProvider<Self>>> {
        &mut set.widgets
    }
}

/// 서버 상세 화면 탭
#[derive(Clone)]
pub struct ServerTab {
    pub id: String,
    pub title: String,
    pub priority: i32,
    visible: Option<VisibilityPredicate>,
}

impl ServerTab {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority: 0,
            visible: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_visibility(
        mut self,
        predicate: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.visible = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for ServerTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTab")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("priority", &self.priority)
            .field("has_visibility", &self.visible.is_some())
            .finish()
    }
}

impl Contribution for ServerTab {
    const KIND: &'static str = "server tab";
    const CAPABILITY: Capability = Capability::Tabs;

    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_visible(&self, ctx: &RequestContext) -> bool {
        self.visible.as_ref().map(|p| p(ctx)).unwrap_or(true)
    }

    fn registry(registries: &ContributionRegistries) -> &ContributionRegistry<Self> {
        &registries.tabs
    }

    fn providers(set: &mut ProviderSet) -> &mut Vec<Arc<dyn ContributionProvider<Self>>> {
        &mut set.tabs
    }
}

// ============================================================================
// ProviderSet - 플러그인 하나가 바인딩한 provider 묶음
// ============================================================================

/// 종류별 provider 목록
#[derive(Default)]
pub struct ProviderSet {
    routes: Vec<Arc<dyn ContributionProvider<Route>>>,
    commands: Vec<Arc<dyn ContributionProvider<ConsoleCommand>>>,
    cron: Vec<Arc<dyn ContributionProvider<CronTask>>>,
    widgets: Vec<Arc<dyn ContributionProvider<Widget>>>,
    tabs: Vec<Arc<dyn ContributionProvider<ServerTab>>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: Contribution>(&mut self, provider: Arc<dyn ContributionProvider<T>>) {
        T::providers(self).push(provider);
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
            && self.commands.is_empty()
            && self.cron.is_empty()
            && self.widgets.is_empty()
            && self.tabs.is_empty()
    }

    fn take<T: Contribution>(&mut self) -> Vec<Arc<dyn ContributionProvider<T>>> {
        std::mem::take(T::providers(self))
    }
}

// ============================================================================
// Collection Report
// ============================================================================

/// 한 플러그인의 수집 실패
#[derive(Debug)]
pub struct CollectionFailure {
    pub plugin: String,
    pub kind: &'static str,
    pub error: Error,
}

/// 수집 결과
#[derive(Debug, Default)]
pub struct CollectionReport {
    /// 플러그인별 등록된 기여물 수
    pub collected: BTreeMap<String, usize>,

    /// provider 오류/패닉/중복 ID 로 제외된 플러그인
    pub failures: Vec<CollectionFailure>,

    /// 기능 미선언으로 건너뛴 (플러그인, 종류)
    pub denied: Vec<CollectionFailure>,
}

impl CollectionReport {
    /// 실패한 플러그인 이름
    pub fn failed_plugins(&self) -> BTreeSet<String> {
        self.failures.iter().map(|f| f.plugin.clone()).collect()
    }

    /// 플러그인별 첫 실패
    pub fn failure_for(&self, plugin: &str) -> Option<&CollectionFailure> {
        self.failures.iter().find(|f| f.plugin == plugin)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.collected.values().sum()
    }
}

// ============================================================================
// ContributionRegistry<T>
// ============================================================================

/// 등록된 기여물 + 소유 플러그인
#[derive(Debug, Clone)]
pub struct ContributionEntry<T> {
    pub owner: String,
    pub item: T,
}

/// 한 종류에 대한 수집 중간 결과
struct KindBuild<T> {
    staged: Vec<(String, Vec<T>)>,
    failures: Vec<CollectionFailure>,
    denied: Vec<CollectionFailure>,
}

/// 종류별 기여물 레지스트리
pub struct ContributionRegistry<T: Contribution> {
    /// 플러그인 → 바인딩된 provider
    providers: RwLock<BTreeMap<String, Vec<Arc<dyn ContributionProvider<T>>>>>,

    /// 플러그인 밖에서 직접 등록된 항목 (재수집에도 유지)
    pinned: RwLock<Vec<ContributionEntry<T>>>,

    /// 게시된 스냅샷 (우선순위 내림차순, 동률은 삽입 순)
    snapshot: RwLock<Arc<Vec<ContributionEntry<T>>>>,
}

impl<T: Contribution> Default for ContributionRegistry<T> {
    fn default() -> Self {
        Self {
            providers: RwLock::new(BTreeMap::new()),
            pinned: RwLock::new(Vec::new()),
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: Contribution> ContributionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // 바인딩
    // ========================================================================

    /// 플러그인의 provider 교체
    pub fn bind(&self, plugin: &str, providers: Vec<Arc<dyn ContributionProvider<T>>>) {
        let mut bound = self.providers.write();
        if providers.is_empty() {
            bound.remove(plugin);
        } else {
            bound.insert(plugin.to_string(), providers);
        }
    }

    pub fn unbind(&self, plugin: &str) {
        self.providers.write().remove(plugin);
    }

    // ========================================================================
    // 등록
    // ========================================================================

    /// 항목 직접 등록
    ///
    /// 같은 ID 가 이미 있으면 `AlreadyRegistered`. 덮어쓰지 않는다.
    pub fn register(&self, owner: &str, item: T) -> Result<()> {
        let mut snapshot = self.snapshot.write();
        let mut pinned = self.pinned.write();

        let exists = snapshot.iter().any(|e| e.item.id() == item.id())
            || pinned.iter().any(|e| e.item.id() == item.id());
        if exists {
            return Err(Error::already_registered(T::KIND, item.id()));
        }

        let entry = ContributionEntry {
            owner: owner.to_string(),
            item,
        };
        pinned.push(entry.clone());

        let mut entries = (**snapshot).clone();
        entries.push(entry);
        sort_entries(&mut entries);
        *snapshot = Arc::new(entries);
        Ok(())
    }

    // ========================================================================
    // 수집
    // ========================================================================

    /// provider 호출 (오류/패닉은 RuntimeFault 로 변환)
    fn invoke(plugin: &str, providers: &[Arc<dyn ContributionProvider<T>>]) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for provider in providers {
            match panic::catch_unwind(AssertUnwindSafe(|| provider.provide())) {
                Ok(Ok(batch)) => items.extend(batch),
                Ok(Err(e)) => {
                    return Err(Error::runtime_fault(
                        plugin,
                        format!("{} provider failed: {}", T::KIND, e),
                    ))
                }
                Err(payload) => {
                    return Err(Error::runtime_fault(
                        plugin,
                        format!("{} provider panicked: {}", T::KIND, panic_message(payload.as_ref())),
                    ))
                }
            }
        }
        Ok(items)
    }

    /// Enabled 플러그인에서 항목을 모은다 (게시는 하지 않음)
    fn build(&self, enabled: &[String], capabilities: &CapabilityRegistry) -> KindBuild<T> {
        let providers = self.providers.read().clone();
        let mut taken: HashSet<String> = self
            .pinned
            .read()
            .iter()
            .map(|e| e.item.id().to_string())
            .collect();

        let mut build = KindBuild {
            staged: Vec::new(),
            failures: Vec::new(),
            denied: Vec::new(),
        };

        for plugin in enabled {
            let Some(bound) = providers.get(plugin) else {
                continue;
            };

            let operation = format!("register {}s", T::KIND);
            if let Err(e) = capabilities.assert_capability(plugin, T::CAPABILITY, &operation) {
                warn!(plugin = %plugin, kind = T::KIND, "Skipping contributions: {}", e);
                build.denied.push(CollectionFailure {
                    plugin: plugin.clone(),
                    kind: T::KIND,
                    error: e,
                });
                continue;
            }

            let items = match Self::invoke(plugin, bound) {
                Ok(items) => items,
                Err(e) => {
                    error!(plugin = %plugin, kind = T::KIND, error = %e, "Contribution collection failed");
                    build.failures.push(CollectionFailure {
                        plugin: plugin.clone(),
                        kind: T::KIND,
                        error: e,
                    });
                    continue;
                }
            };

            if let Some(duplicate) = first_duplicate(&taken, &items) {
                let e = Error::already_registered(T::KIND, duplicate);
                error!(plugin = %plugin, error = %e, "Duplicate contribution id");
                build.failures.push(CollectionFailure {
                    plugin: plugin.clone(),
                    kind: T::KIND,
                    error: e,
                });
                continue;
            }

            taken.extend(items.iter().map(|item| item.id().to_string()));
            build.staged.push((plugin.clone(), items));
        }

        build
    }

    /// 새 스냅샷 게시 (excluded 플러그인의 항목은 버림)
    fn publish(&self, staged: Vec<(String, Vec<T>)>, excluded: &BTreeSet<String>) -> BTreeMap<String, usize> {
        let mut snapshot = self.snapshot.write();
        let mut entries: Vec<ContributionEntry<T>> = self.pinned.read().clone();
        let mut counts = BTreeMap::new();

        for (owner, items) in staged {
            if excluded.contains(&owner) {
                continue;
            }
            *counts.entry(owner.clone()).or_insert(0) += items.len();
            entries.extend(items.into_iter().map(|item| ContributionEntry {
                owner: owner.clone(),
                item,
            }));
        }

        sort_entries(&mut entries);
        debug!(kind = T::KIND, count = entries.len(), "Contribution snapshot published");
        *snapshot = Arc::new(entries);
        counts
    }

    /// 한 플러그인의 기여물을 등록 없이 검증
    ///
    /// provider 오류/패닉, 다른 플러그인과의 ID 충돌을 미리 잡는다.
    /// 기능이 없으면 아무 것도 수집되지 않으므로 0 을 돌려준다.
    pub fn dry_run(&self, plugin: &str, capabilities: &CapabilityRegistry) -> Result<usize> {
        let bound = match self.providers.read().get(plugin) {
            Some(bound) => bound.clone(),
            None => return Ok(0),
        };

        if !capabilities.has_capability(plugin, T::CAPABILITY) {
            warn!(
                plugin,
                kind = T::KIND,
                capability = %T::CAPABILITY,
                "Plugin binds providers without declaring the capability"
            );
            return Ok(0);
        }

        let items = Self::invoke(plugin, &bound)?;

        let snapshot = self.snapshot();
        let taken: HashSet<String> = snapshot
            .iter()
            .filter(|e| e.owner != plugin)
            .map(|e| e.item.id().to_string())
            .collect();

        if let Some(duplicate) = first_duplicate(&taken, &items) {
            return Err(Error::already_registered(T::KIND, duplicate));
        }

        Ok(items.len())
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 현재 스냅샷
    pub fn snapshot(&self) -> Arc<Vec<ContributionEntry<T>>> {
        self.snapshot.read().clone()
    }

    /// 모든 항목 (우선순위 순)
    pub fn items(&self) -> Vec<T> {
        self.snapshot().iter().map(|e| e.item.clone()).collect()
    }

    /// ID 로 조회
    pub fn get(&self, id: &str) -> Option<T> {
        self.snapshot()
            .iter()
            .find(|e| e.item.id() == id)
            .map(|e| e.item.clone())
    }

    /// 특정 플러그인이 기여한 항목
    pub fn by_owner(&self, owner: &str) -> Vec<T> {
        self.snapshot()
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.item.clone())
            .collect()
    }

    /// 요청 컨텍스트에서 보이는 항목
    pub fn visible(&self, ctx: &RequestContext) -> Vec<T> {
        self.snapshot()
            .iter()
            .filter(|e| e.item.is_visible(ctx))
            .map(|e| e.item.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sort_entries<T: Contribution>(entries: &mut [ContributionEntry<T>]) {
    // stable sort: 동률은 삽입 순서 유지
    entries.sort_by_key(|e| Reverse(e.item.priority()));
}

fn first_duplicate<T: Contribution>(taken: &HashSet<String>, items: &[T]) -> Option<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    items
        .iter()
        .find(|item| taken.contains(item.id()) || !seen.insert(item.id()))
        .map(|item| item.id().to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// ContributionRegistries - 다섯 종류 묶음
// ============================================================================

/// 종류별 기여물 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionCounts {
    pub routes: usize,
    pub commands: usize,
    pub cron: usize,
    pub widgets: usize,
    pub tabs: usize,
}

impl ContributionCounts {
    pub fn total(&self) -> usize {
        self.routes + self.commands + self.cron + self.widgets + self.tabs
    }
}

/// 모든 기여물 레지스트리
#[derive(Default)]
pub struct ContributionRegistries {
    pub routes: ContributionRegistry<Route>,
    pub commands: ContributionRegistry<ConsoleCommand>,
    pub cron: ContributionRegistry<CronTask>,
    pub widgets: ContributionRegistry<Widget>,
    pub tabs: ContributionRegistry<ServerTab>,
}

impl ContributionRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    /// 종류로 레지스트리 선택
    pub fn get<T: Contribution>(&self) -> &ContributionRegistry<T> {
        T::registry(self)
    }

    /// 플러그인의 provider 묶음 바인딩 (이전 바인딩 교체)
    pub fn bind(&self, plugin: &str, mut providers: ProviderSet) {
        self.routes.bind(plugin, providers.take());
        self.commands.bind(plugin, providers.take());
        self.cron.bind(plugin, providers.take());
        self.widgets.bind(plugin, providers.take());
        self.tabs.bind(plugin, providers.take());
    }

    pub fn unbind(&self, plugin: &str) {
        self.routes.unbind(plugin);
        self.commands.unbind(plugin);
        self.cron.unbind(plugin);
        self.widgets.unbind(plugin);
        self.tabs.unbind(plugin);
    }

    /// Enabled 플러그인 집합에서 모든 종류를 다시 수집
    ///
    /// `enabled` 는 활성화 순서. 어느 종류에서든 실패한 플러그인은
    /// 모든 종류에서 항목이 빠진다.
    pub fn collect(&self, enabled: &[String], capabilities: &CapabilityRegistry) -> CollectionReport {
        let routes = self.routes.build(enabled, capabilities);
        let commands = self.commands.build(enabled, capabilities);
        let cron = self.cron.build(enabled, capabilities);
        let widgets = self.widgets.build(enabled, capabilities);
        let tabs = self.tabs.build(enabled, capabilities);

        let mut report = CollectionReport::default();
        for (failures, denied) in [
            (routes.failures, routes.denied),
            (commands.failures, commands.denied),
            (cron.failures, cron.denied),
            (widgets.failures, widgets.denied),
            (tabs.failures, tabs.denied),
        ] {
            report.failures.extend(failures);
            report.denied.extend(denied);
        }

        let excluded = report.failed_plugins();
        for counts in [
            self.routes.publish(routes.staged, &excluded),
            self.commands.publish(commands.staged, &excluded),
            self.cron.publish(cron.staged, &excluded),
            self.widgets.publish(widgets.staged, &excluded),
            self.tabs.publish(tabs.staged, &excluded),
        ] {
            for (plugin, count) in counts {
                *report.collected.entry(plugin).or_insert(0) += count;
            }
        }

        report
    }

    /// 한 플러그인의 모든 종류를 등록 없이 검증
    pub fn dry_run(&self, plugin: &str, capabilities: &CapabilityRegistry) -> Result<usize> {
        Ok(self.routes.dry_run(plugin, capabilities)?
            + self.commands.dry_run(plugin, capabilities)?
            + self.cron.dry_run(plugin, capabilities)?
            + self.widgets.dry_run(plugin, capabilities)?
            + self.tabs.dry_run(plugin, capabilities)?)
    }

    /// 플러그인이 현재 기여 중인 항목 수
    pub fn counts_for(&self, plugin: &str) -> ContributionCounts {
        ContributionCounts {
            routes: self.routes.by_owner(plugin).len(),
            commands: self.commands.by_owner(plugin).len(),
            cron: self.cron.by_owner(plugin).len(),
            widgets: self.widgets.by_owner(plugin).len(),
            tabs: self.tabs.by_owner(plugin).len(),
        }
    }

    /// 전체 항목 수
    pub fn counts(&self) -> ContributionCounts {
        ContributionCounts {
            routes: self.routes.len(),
            commands: self.commands.len(),
            cron: self.cron.len(),
            widgets: self.widgets.len(),
            tabs: self.tabs.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(grants: &[(&str, &[Capability])]) -> CapabilityRegistry {
        let registry = CapabilityRegistry::new();
        for (plugin, declared) in grants {
            registry.register_capabilities(plugin, declared.iter().copied());
        }
        registry
    }

    fn routes_provider(paths: &'static [&'static str]) -> ProviderSet {
        let mut set = ProviderSet::new();
        let provider: Arc<dyn ContributionProvider<Route>> =
            Arc::new(move || -> Result<Vec<Route>> {
                Ok(paths.iter().map(|p| Route::get(*p)).collect())
            });
        set.push(provider);
        set
    }

    fn enabled(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_collect_only_from_enabled_with_capability() {
        let registries = ContributionRegistries::new();
        registries.bind("billing", routes_provider(&["/billing", "/billing/invoices"]));
        registries.bind("reports", routes_provider(&["/reports"]));
        registries.bind("tickets", routes_provider(&["/tickets"]));

        let capabilities = caps(&[
            ("billing", &[Capability::Routes]),
            ("reports", &[Capability::Ui]),
            ("tickets", &[Capability::Routes]),
        ]);

        // tickets 는 Enabled 가 아님
        let report = registries.collect(&enabled(&["billing", "reports"]), &capabilities);

        assert!(report.is_clean());
        assert_eq!(registries.routes.len(), 2);
        assert!(registries.routes.by_owner("reports").is_empty());
        assert!(registries.routes.by_owner("tickets").is_empty());
        assert_eq!(report.denied.len(), 1);
        assert!(matches!(
            report.denied[0].error,
            Error::Capability { capability: Capability::Routes, .. }
        ));
    }

    #[test]
    fn test_failing_plugin_is_isolated() {
        let registries = ContributionRegistries::new();
        registries.bind("good", routes_provider(&["/good"]));

        let mut bad = ProviderSet::new();
        let broken: Arc<dyn ContributionProvider<Route>> =
            Arc::new(|| -> Result<Vec<Route>> { Err(Error::Internal("database offline".into())) });
        bad.push(broken);
        let widget: Arc<dyn ContributionProvider<Widget>> =
            Arc::new(|| -> Result<Vec<Widget>> { Ok(vec![Widget::new("bad-widget", "Bad")]) });
        bad.push(widget);
        registries.bind("bad", bad);

        let mut panicky = ProviderSet::new();
        let exploding: Arc<dyn ContributionProvider<CronTask>> =
            Arc::new(|| -> Result<Vec<CronTask>> { panic!("provider exploded") });
        panicky.push(exploding);
        registries.bind("panicky", panicky);

        let capabilities = caps(&[
            ("good", &[Capability::Routes]),
            ("bad", &[Capability::Routes, Capability::Widgets]),
            ("panicky", &[Capability::Cron]),
        ]);

        let report = registries.collect(&enabled(&["bad", "good", "panicky"]), &capabilities);

        assert_eq!(
            report.failed_plugins().into_iter().collect::<Vec<_>>(),
            vec!["bad", "panicky"]
        );
        assert!(matches!(
            report.failure_for("panicky").map(|f| &f.error),
            Some(Error::RuntimeFault { message, .. }) if message.contains("provider exploded")
        ));
        // bad 의 위젯도 함께 버려진다
        assert!(registries.widgets.is_empty());
        assert_eq!(registries.routes.items().len(), 1);
        assert_eq!(report.collected.get("good"), Some(&1));
    }

    #[test]
    fn test_duplicate_id_fails_later_plugin() {
        let registries = ContributionRegistries::new();
        registries.bind("alpha", routes_provider(&["/shared"]));
        registries.bind("beta", routes_provider(&["/shared", "/beta"]));

        let capabilities = caps(&[
            ("alpha", &[Capability::Routes]),
            ("beta", &[Capability::Routes]),
        ]);
        let report = registries.collect(&enabled(&["alpha", "beta"]), &capabilities);

        assert!(matches!(
            report.failure_for("beta").map(|f| &f.error),
            Some(Error::AlreadyRegistered { id, .. }) if id == "GET /shared"
        ));
        assert_eq!(registries.routes.by_owner("alpha").len(), 1);
        assert!(registries.routes.by_owner("beta").is_empty());
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry: ContributionRegistry<Route> = ContributionRegistry::new();
        registry.register("host", Route::get("/health")).unwrap();

        let err = registry.register("host", Route::get("/health")).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { ref kind, .. } if kind == "route"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_pinned_items_survive_rebuild() {
        let registries = ContributionRegistries::new();
        registries.routes.register("host", Route::get("/login")).unwrap();
        registries.bind("billing", routes_provider(&["/billing"]));

        let capabilities = caps(&[("billing", &[Capability::Routes])]);
        registries.collect(&enabled(&["billing"]), &capabilities);
        assert_eq!(registries.routes.len(), 2);

        registries.collect(&[], &capabilities);
        assert_eq!(registries.routes.items(), vec![Route::get("/login")]);
    }

    #[test]
    fn test_priority_order_is_stable() {
        let registry: ContributionRegistry<Widget> = ContributionRegistry::new();
        registry.register("a", Widget::new("first", "First")).unwrap();
        registry
            .register("a", Widget::new("top", "Top").with_priority(10))
            .unwrap();
        registry.register("b", Widget::new("second", "Second")).unwrap();
        registry
            .register("b", Widget::new("bottom", "Bottom").with_priority(-1))
            .unwrap();

        let ids: Vec<String> = registry.items().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["top", "first", "second", "bottom"]);
    }

    #[test]
    fn test_visibility_predicate() {
        let registry: ContributionRegistry<ServerTab> = ContributionRegistry::new();
        registry
            .register(
                "backups",
                ServerTab::new("backups", "Backups").with_visibility(|ctx| ctx.has_permission("backups.view")),
            )
            .unwrap();
        registry
            .register("console", ServerTab::new("console", "Console"))
            .unwrap();

        let guest = RequestContext::user("12").with_server("srv-1");
        let ids: Vec<String> = registry.visible(&guest).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["console"]);

        let admin = RequestContext::admin("1");
        assert_eq!(registry.visible(&admin).len(), 2);
    }

    #[test]
    fn test_dry_run_detects_conflicts_and_faults() {
        let registries = ContributionRegistries::new();
        registries.bind("alpha", routes_provider(&["/shared"]));
        let capabilities = caps(&[
            ("alpha", &[Capability::Routes]),
            ("beta", &[Capability::Routes]),
            ("gamma", &[Capability::Ui]),
        ]);
        registries.collect(&enabled(&["alpha"]), &capabilities);

        registries.bind("beta", routes_provider(&["/shared"]));
        assert!(matches!(
            registries.dry_run("beta", &capabilities),
            Err(Error::AlreadyRegistered { .. })
        ));

        // 자기 자신의 기존 항목과는 충돌하지 않는다
        assert_eq!(registries.dry_run("alpha", &capabilities).unwrap(), 1);

        // 기능이 없으면 아무 것도 수집되지 않는다
        registries.bind("gamma", routes_provider(&["/gamma"]));
        assert_eq!(registries.dry_run("gamma", &capabilities).unwrap(), 0);
    }

    #[test]
    fn test_console_command_runs() {
        let command = ConsoleCommand::new("servers:restart", "Restart a server", |args| {
            Ok(format!("restarting {}", args.join(" ")))
        });
        assert_eq!(
            command.run(&["srv-1".to_string()]).unwrap(),
            "restarting srv-1"
        );
    }
}
