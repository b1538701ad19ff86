//! Plugin Events - 라이프사이클 이벤트 시스템
//!
//! 핸들러는 우선순위(높은 값 먼저), 같은 우선순위는 등록 순서로 호출된다.
//! 수동 구독자는 broadcast 채널로 같은 이벤트를 받는다.

use super::manifest::PluginManifest;
use async_trait::async_trait;
use gamepanel_foundation::{Actor, PluginState};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

// ============================================================================
// PluginEvent - 플러그인 이벤트 타입
// ============================================================================

/// 플러그인 라이프사이클 이벤트
#[derive(Debug, Clone)]
pub struct PluginEvent {
    /// 이벤트 ID
    pub id: String,

    /// 타임스탬프
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// 대상 플러그인
    pub plugin: String,

    /// 이벤트를 일으킨 주체
    pub actor: Actor,

    /// 이벤트 종류와 페이로드
    pub kind: PluginEventKind,

    /// 사유 (선택)
    pub reason: Option<String>,
}

impl PluginEvent {
    /// 새 이벤트 생성
    pub fn new(plugin: impl Into<String>, actor: Actor, kind: PluginEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            plugin: plugin.into(),
            actor,
            kind,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    /// 상태 전이 이벤트면 (from, to)
    pub fn transition(&self) -> Option<(PluginState, PluginState)> {
        self.kind.transition()
    }

    // ========================================================================
    // 생성 헬퍼
    // ========================================================================

    pub fn discovered(manifest: PluginManifest, path: PathBuf) -> Self {
        Self::new(
            manifest.name.clone(),
            Actor::System,
            PluginEventKind::Discovered {
                path,
                manifest: Box::new(manifest),
            },
        )
    }

    pub fn registered(plugin: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(
            plugin,
            Actor::System,
            PluginEventKind::Registered {
                version: version.into(),
            },
        )
    }

    pub fn enabled(plugin: impl Into<String>, from: PluginState, actor: Actor) -> Self {
        Self::new(plugin, actor, PluginEventKind::Enabled { from })
    }

    pub fn disabled(plugin: impl Into<String>, from: PluginState, actor: Actor) -> Self {
        Self::new(plugin, actor, PluginEventKind::Disabled { from })
    }

    pub fn faulted(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            plugin,
            Actor::System,
            PluginEventKind::Faulted {
                reason: reason.clone(),
            },
        )
        .with_reason(reason)
    }

    pub fn updated(
        plugin: impl Into<String>,
        from_version: impl Into<String>,
        to_version: impl Into<String>,
    ) -> Self {
        Self::new(
            plugin,
            Actor::System,
            PluginEventKind::Updated {
                from_version: from_version.into(),
                to_version: to_version.into(),
            },
        )
    }
}

/// 이벤트 종류별 페이로드
#[derive(Debug, Clone)]
pub enum PluginEventKind {
    /// 매니페스트 로드 성공 (상태 변화 없음)
    Discovered {
        path: PathBuf,
        manifest: Box<PluginManifest>,
    },
    /// Discovered → Registered
    Registered { version: String },
    /// Registered/Disabled → Enabled
    Enabled { from: PluginState },
    /// Enabled/Faulted → Disabled
    Disabled { from: PluginState },
    /// Enabled → Faulted
    Faulted { reason: String },
    /// 재발견 시 버전 변경 (상태 변화 없음)
    Updated {
        from_version: String,
        to_version: String,
    },
}

impl PluginEventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Discovered { .. } => EventType::PluginDiscovered,
            Self::Registered { .. } => EventType::PluginRegistered,
            Self::Enabled { .. } => EventType::PluginEnabled,
            Self::Disabled { .. } => EventType::PluginDisabled,
            Self::Faulted { .. } => EventType::PluginFaulted,
            Self::Updated { .. } => EventType::PluginUpdated,
        }
    }

    pub fn transition(&self) -> Option<(PluginState, PluginState)> {
        match self {
            Self::Registered { .. } => Some((PluginState::Discovered, PluginState::Registered)),
            Self::Enabled { from } => Some((*from, PluginState::Enabled)),
            Self::Disabled { from } => Some((*from, PluginState::Disabled)),
            Self::Faulted { .. } => Some((PluginState::Enabled, PluginState::Faulted)),
            Self::Discovered { .. } | Self::Updated { .. } => None,
        }
    }
}

/// 이벤트 타입 (필터링용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PluginDiscovered,
    PluginRegistered,
    PluginEnabled,
    PluginDisabled,
    PluginFaulted,
    PluginUpdated,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::PluginDiscovered,
        EventType::PluginRegistered,
        EventType::PluginEnabled,
        EventType::PluginDisabled,
        EventType::PluginFaulted,
        EventType::PluginUpdated,
    ];
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PluginDiscovered => write!(f, "plugin_discovered"),
            Self::PluginRegistered => write!(f, "plugin_registered"),
            Self::PluginEnabled => write!(f, "plugin_enabled"),
            Self::PluginDisabled => write!(f, "plugin_disabled"),
            Self::PluginFaulted => write!(f, "plugin_faulted"),
            Self::PluginUpdated => write!(f, "plugin_updated"),
        }
    }
}

// ============================================================================
// PluginEventHandler - 이벤트 핸들러 트레이트
// ============================================================================

/// 이벤트 핸들러 트레이트
#[async_trait]
pub trait PluginEventHandler: Send + Sync {
    /// 핸들러 이름 (같은 이름으로 다시 등록하면 교체)
    fn name(&self) -> &str;

    /// 우선순위 (높을수록 먼저 호출)
    fn priority(&self) -> i32 {
        0
    }

    /// 관심 있는 이벤트 타입들
    fn interested_events(&self) -> Vec<EventType> {
        EventType::ALL.to_vec()
    }

    /// 이벤트 처리
    async fn handle(&self, event: &PluginEvent);
}

// ============================================================================
// EventBus - 이벤트 버스 (발행/구독)
// ============================================================================

/// 이벤트 버스 - 이벤트 발행 및 구독 관리
pub struct EventBus {
    /// 브로드캐스트 채널 발신자
    sender: broadcast::Sender<PluginEvent>,

    /// 등록된 핸들러 (호출 순서로 정렬됨)
    handlers: RwLock<Vec<Arc<dyn PluginEventHandler>>>,

    /// 이벤트 히스토리 (최근 N개)
    history: RwLock<VecDeque<PluginEvent>>,

    /// 히스토리 최대 크기
    history_size: usize,
}

impl EventBus {
    /// 새 이벤트 버스 생성
    pub fn new() -> Self {
        Self::with_capacity(1024, 100)
    }

    /// 용량 지정하여 생성
    pub fn with_capacity(channel_capacity: usize, history_size: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            sender,
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(history_size)),
            history_size,
        }
    }

    /// 이벤트 핸들러 등록
    pub async fn register_handler(&self, handler: Arc<dyn PluginEventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.retain(|h| h.name() != handler.name());

        // 같은 우선순위 안에서는 뒤에 붙는다
        let position = handlers
            .iter()
            .position(|h| h.priority() < handler.priority())
            .unwrap_or(handlers.len());
        handlers.insert(position, handler);
    }

    /// 이벤트 핸들러 제거
    pub async fn unregister_handler(&self, name: &str) {
        let mut handlers = self.handlers.write().await;
        handlers.retain(|h| h.name() != name);
    }

    /// 이벤트 발행
    ///
    /// 모든 관심 핸들러가 처리한 뒤에 반환한다.
    pub async fn publish(&self, event: PluginEvent) {
        debug!(plugin = %event.plugin, event = %event.event_type(), "Publishing event");

        // 히스토리에 추가
        {
            let mut history = self.history.write().await;
            if history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // 브로드캐스트 (구독자가 없어도 OK)
        let _ = self.sender.send(event.clone());

        // 핸들러 호출
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            if handler.interested_events().contains(&event.event_type()) {
                handler.handle(&event).await;
            }
        }
    }

    /// 이벤트 구독 (스트림 반환)
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.sender.subscribe()
    }

    /// 이벤트 히스토리 조회
    pub async fn history(&self) -> Vec<PluginEvent> {
        let history = self.history.read().await;
        history.iter().cloned().collect()
    }

    /// 특정 타입의 이벤트 히스토리 조회
    pub async fn history_by_type(&self, event_type: EventType) -> Vec<PluginEvent> {
        let history = self.history.read().await;
        history
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// 등록된 핸들러 수
    pub async fn handler_count(&self) -> usize {
        let handlers = self.handlers.read().await;
        handlers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingHandler {
        name: String,
        priority: i32,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PluginEventHandler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn interested_events(&self) -> Vec<EventType> {
            vec![EventType::PluginEnabled]
        }

        async fn handle(&self, event: &PluginEvent) {
            self.calls
                .lock()
                .push(format!("{}:{}", self.name, event.plugin));
        }
    }

    fn handler(name: &str, priority: i32, calls: &Arc<Mutex<Vec<String>>>) -> Arc<RecordingHandler> {
        Arc::new(RecordingHandler {
            name: name.to_string(),
            priority,
            calls: calls.clone(),
        })
    }

    #[tokio::test]
    async fn test_handlers_run_by_priority_then_registration() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        bus.register_handler(handler("low", -5, &calls)).await;
        bus.register_handler(handler("first", 10, &calls)).await;
        bus.register_handler(handler("second", 10, &calls)).await;
        bus.register_handler(handler("default", 0, &calls)).await;
        assert_eq!(bus.handler_count().await, 4);

        bus.publish(PluginEvent::enabled("reports", PluginState::Registered, Actor::System))
            .await;
        // 관심 없는 이벤트
        bus.publish(PluginEvent::registered("reports", "1.0.0")).await;

        assert_eq!(
            *calls.lock(),
            vec!["first:reports", "second:reports", "default:reports", "low:reports"]
        );
    }

    #[tokio::test]
    async fn test_reregister_replaces_handler() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        bus.register_handler(handler("audit", 0, &calls)).await;
        bus.register_handler(handler("audit", 0, &calls)).await;
        assert_eq!(bus.handler_count().await, 1);

        bus.unregister_handler("audit").await;
        assert_eq!(bus.handler_count().await, 0);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = EventBus::with_capacity(16, 2);
        for name in ["a", "b", "c"] {
            bus.publish(PluginEvent::registered(name, "1.0.0")).await;
        }

        let history = bus.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].plugin, "b");
        assert_eq!(bus.history_by_type(EventType::PluginEnabled).await.len(), 0);
    }

    #[tokio::test]
    async fn test_event_subscribe() {
        let bus = Arc::new(EventBus::new());
        let mut receiver = bus.subscribe();

        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher
                .publish(PluginEvent::faulted("billing", "health_check_failed"))
                .await;
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), EventType::PluginFaulted);
        assert_eq!(
            event.transition(),
            Some((PluginState::Enabled, PluginState::Faulted))
        );
        assert_eq!(event.reason.as_deref(), Some("health_check_failed"));
    }
}
