//! Core Types - 공용 타입 정의
//!
//! 모든 레이어에서 공통으로 사용하는 플러그인 런타임 어휘

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PluginState - 라이프사이클 상태
// ============================================================================

/// 플러그인 라이프사이클 상태
///
/// ```text
/// Discovered → Registered → Enabled ⇄ Disabled
///                              │          ▲
///                              ▼          │
///                           Faulted ──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// 매니페스트를 읽었지만 아직 등록되지 않음
    Discovered,
    /// 검증 완료, 레코드 생성됨
    Registered,
    /// 활성화됨 - 기여(contribution)가 레지스트리에 반영됨
    Enabled,
    /// 운영자가 비활성화함
    Disabled,
    /// 런타임 장애로 자동 격리됨
    Faulted,
}

impl PluginState {
    pub const ALL: [PluginState; 5] = [
        PluginState::Discovered,
        PluginState::Registered,
        PluginState::Enabled,
        PluginState::Disabled,
        PluginState::Faulted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Registered => "registered",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Faulted => "faulted",
        }
    }

    /// 이 상태에서 이동할 수 있는 상태 목록
    pub fn valid_transitions(&self) -> &'static [PluginState] {
        match self {
            Self::Discovered => &[PluginState::Registered],
            Self::Registered => &[PluginState::Enabled],
            Self::Enabled => &[PluginState::Disabled, PluginState::Faulted],
            Self::Disabled => &[PluginState::Enabled],
            Self::Faulted => &[PluginState::Disabled],
        }
    }

    pub fn can_transition_to(&self, target: PluginState) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// 기여를 제공할 수 있는 상태인지
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::Storage(format!("Unknown plugin state: {}", s)))
    }
}

// ============================================================================
// Capability - 플러그인 기능 선언
// ============================================================================

/// 플러그인이 매니페스트에서 선언하는 기능 (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// HTTP 라우트 등록
    Routes,
    /// 콘솔 명령어 등록
    Console,
    /// 예약 작업 등록
    Cron,
    /// 관리자 UI 확장
    Ui,
    /// 대시보드 위젯
    Widgets,
    /// 서버 상세 화면 탭
    Tabs,
    /// 이벤트 구독
    Events,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Routes,
        Capability::Console,
        Capability::Cron,
        Capability::Ui,
        Capability::Widgets,
        Capability::Tabs,
        Capability::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routes => "routes",
            Self::Console => "console",
            Self::Cron => "cron",
            Self::Ui => "ui",
            Self::Widgets => "widgets",
            Self::Tabs => "tabs",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|cap| cap.as_str() == s)
            .ok_or_else(|| Error::UnknownCapability {
                token: s.to_string(),
            })
    }
}

// ============================================================================
// Actor - 전이를 일으킨 주체
// ============================================================================

/// 상태 전이를 일으킨 주체 (`user:<id>` 또는 `system`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Actor {
    /// 런타임 자동 전이 (boot, health check, fault)
    #[default]
    System,
    /// 운영자
    User(String),
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::User(id) => write!(f, "user:{}", id),
        }
    }
}

impl FromStr for Actor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            return Ok(Self::System);
        }
        match s.strip_prefix("user:") {
            Some(id) if !id.is_empty() => Ok(Self::User(id.to_string())),
            _ => Err(Error::Internal(format!("Invalid actor: {}", s))),
        }
    }
}

impl Serialize for Actor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Actor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use PluginState::*;

        assert!(Discovered.can_transition_to(Registered));
        assert!(Registered.can_transition_to(Enabled));
        assert!(Disabled.can_transition_to(Enabled));
        assert!(Enabled.can_transition_to(Disabled));
        assert!(Enabled.can_transition_to(Faulted));
        assert!(Faulted.can_transition_to(Disabled));

        assert!(!Faulted.can_transition_to(Enabled));
        assert!(!Discovered.can_transition_to(Enabled));
        assert!(!Registered.can_transition_to(Disabled));
        assert!(!Disabled.can_transition_to(Faulted));
    }

    #[test]
    fn test_state_parse() {
        for state in PluginState::ALL {
            assert_eq!(state.as_str().parse::<PluginState>().unwrap(), state);
        }
        assert!("running".parse::<PluginState>().is_err());
    }

    #[test]
    fn test_unknown_capability() {
        let err = "payments".parse::<Capability>().unwrap_err();
        assert!(matches!(err, Error::UnknownCapability { token } if token == "payments"));
        assert_eq!("widgets".parse::<Capability>().unwrap(), Capability::Widgets);
    }

    #[test]
    fn test_actor_format() {
        assert_eq!(Actor::System.to_string(), "system");
        assert_eq!(Actor::user("42").to_string(), "user:42");
        assert_eq!("user:42".parse::<Actor>().unwrap(), Actor::user("42"));
        assert!("user:".parse::<Actor>().is_err());

        let json = serde_json::to_string(&Actor::user("admin")).unwrap();
        assert_eq!(json, "\"user:admin\"");
    }
}
