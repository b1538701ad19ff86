//! Storage module for gamepanel
//!
//! - `db`: SQLite - 플러그인 레코드 (라이프사이클 상태)
//! - `json`: JSON - 설정 파일 저장/로드

mod db;
mod json;

// SQLite Storage (플러그인 레코드)
pub use db::{PluginRecord, PluginRegistration, RegisterOutcome, Storage, DATABASE_FILE};

// JSON Storage (설정)
pub use json::JsonStore;
