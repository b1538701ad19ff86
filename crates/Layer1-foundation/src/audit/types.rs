//! Audit Log Types - 감사 로그 타입 정의
//!
//! 플러그인 라이프사이클 전이의 감사 기록을 위한 타입들입니다.

use crate::core::{Actor, PluginState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Audit Record ID
// ============================================================================

/// 감사 로그 레코드 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(pub String);

impl AuditId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Audit Record
// ============================================================================

/// 감사 로그 레코드
///
/// 한 번 기록되면 수정/삭제되지 않는다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// 고유 ID
    pub id: AuditId,

    /// 발생 시간
    pub timestamp: DateTime<Utc>,

    /// 대상 플러그인
    pub plugin: String,

    /// 이전 상태
    pub from_state: PluginState,

    /// 새 상태
    pub to_state: PluginState,

    /// 전이를 일으킨 주체
    pub actor: Actor,

    /// 사유 (fault reason, cascade 등)
    pub reason: Option<String>,
}

impl AuditRecord {
    /// 상태 전이 레코드 생성
    pub fn transition(
        plugin: impl Into<String>,
        from_state: PluginState,
        to_state: PluginState,
        actor: Actor,
    ) -> Self {
        Self {
            id: AuditId::new(),
            timestamp: Utc::now(),
            plugin: plugin.into(),
            from_state,
            to_state,
            actor,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ============================================================================
// Audit Query
// ============================================================================

/// 감사 로그 조회 조건
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// 플러그인 필터
    pub plugin: Option<String>,

    /// 도착 상태 필터
    pub to_states: Option<Vec<PluginState>>,

    /// 주체 필터
    pub actor: Option<Actor>,

    /// 시작 시간
    pub from: Option<DateTime<Utc>>,

    /// 종료 시간
    pub to: Option<DateTime<Utc>>,

    /// 최대 개수
    pub limit: Option<usize>,

    /// 오프셋
    pub offset: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_to_states(mut self, states: Vec<PluginState>) -> Self {
        self.to_states = Some(states);
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// 레코드가 조건에 맞는지 확인 (limit/offset 제외)
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(ref plugin) = self.plugin {
            if &record.plugin != plugin {
                return false;
            }
        }

        if let Some(ref states) = self.to_states {
            if !states.contains(&record.to_state) {
                return false;
            }
        }

        if let Some(ref actor) = self.actor {
            if &record.actor != actor {
                return false;
            }
        }

        if let Some(from) = self.from {
            if record.timestamp < from {
                return false;
            }
        }

        if let Some(to) = self.to {
            if record.timestamp > to {
                return false;
            }
        }

        true
    }
}

// ============================================================================
// Audit Statistics
// ============================================================================

/// 감사 로그 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    /// 총 레코드 수
    pub total_entries: u64,

    /// 도착 상태별 카운트
    pub by_to_state: HashMap<String, u64>,

    /// 플러그인별 카운트
    pub by_plugin: HashMap<String, u64>,

    /// 기록 실패 횟수 (프로세스 시작 이후)
    pub failed_writes: u64,

    /// 기간
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}
