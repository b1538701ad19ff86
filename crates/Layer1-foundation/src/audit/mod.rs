//! Audit System - 감사 로깅 시스템
//!
//! 플러그인 라이프사이클 전이를 append-only 로 기록합니다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      AuditLogger                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │  log(record) ──► SQLite audit_log (append-only)     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         ▲                                                   │
//! │         │                                                   │
//! │  ┌──────────────────┐                                       │
//! │  │AuditEventHandler │ ◄── plugin EventBus (gamepanel-core)  │
//! │  └──────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! 기록 실패는 전이를 막지 않는다. 실패 횟수는 `failed_writes()` 로 노출.
//! 정리(cleanup) API 는 없다.

pub mod logger;
pub mod types;

// Re-exports
pub use logger::AuditLogger;
pub use types::{AuditId, AuditQuery, AuditRecord, AuditStatistics};
