//! # gamepanel-foundation
//!
//! Foundation layer for the gamepanel plugin runtime:
//! - Core: 공용 어휘 (PluginState, Capability, Actor)
//! - Error: 단일 에러 타입
//! - Storage: SQLite (플러그인 레코드), JsonStore (설정)
//! - Audit: 라이프사이클 전이 감사 로그
//! - Config: RuntimeConfig
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  gamepanel-core (plugin runtime)                        │
//! │                     │                                   │
//! │          ┌──────────┼──────────┐                        │
//! │          ▼          ▼          ▼                        │
//! │      Storage    AuditLogger  RuntimeConfig              │
//! │   (plugins 테이블) (audit_log)  (gamepanel.json)         │
//! │          └──────────┬──────────┘                        │
//! │                     ▼                                   │
//! │              gamepanel.db (SQLite, WAL)                 │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{DependencyViolation, Error, Result};

// ============================================================================
// Core (공용 타입)
// ============================================================================
pub use core::{Actor, Capability, PluginState};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{HealthSettings, InstallerSettings, RuntimeConfig, RUNTIME_CONFIG_FILE};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{
    // JSON (설정)
    JsonStore,
    // SQLite (플러그인 레코드)
    PluginRecord,
    PluginRegistration,
    RegisterOutcome,
    Storage,
};

// ============================================================================
// Audit (감사 로깅)
// ============================================================================
pub use audit::{AuditId, AuditLogger, AuditQuery, AuditRecord, AuditStatistics};
