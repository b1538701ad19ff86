//! Audit bridge - 라이프사이클 이벤트를 감사 로그로 기록

use super::events::{EventType, PluginEvent, PluginEventHandler};
use async_trait::async_trait;
use gamepanel_foundation::{AuditLogger, AuditRecord};
use std::sync::Arc;
use tracing::debug;

/// 상태 전이 이벤트마다 감사 레코드 한 건을 남기는 핸들러
pub struct AuditEventHandler {
    logger: Arc<AuditLogger>,
}

impl AuditEventHandler {
    pub const NAME: &'static str = "audit";

    pub fn new(logger: Arc<AuditLogger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl PluginEventHandler for AuditEventHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    /// 다른 핸들러보다 먼저 기록
    fn priority(&self) -> i32 {
        100
    }

    fn interested_events(&self) -> Vec<EventType> {
        vec![
            EventType::PluginRegistered,
            EventType::PluginEnabled,
            EventType::PluginDisabled,
            EventType::PluginFaulted,
        ]
    }

    async fn handle(&self, event: &PluginEvent) {
        let Some((from, to)) = event.transition() else {
            return;
        };

        let mut record = AuditRecord::transition(&event.plugin, from, to, event.actor.clone())
            .with_timestamp(event.timestamp);
        if let Some(reason) = &event.reason {
            record = record.with_reason(reason);
        }

        // 실패는 로거 안에서 집계된다
        if let Some(id) = self.logger.log(record).await {
            debug!(plugin = %event.plugin, audit_id = %id, "Transition audited");
        }
    }
}
