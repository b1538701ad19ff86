//! Core Module - 플러그인 런타임 공용 어휘
//!
//! - `types.rs`: 라이프사이클 상태, 기능(capability), 전이 주체(actor)

mod types;

pub use types::{Actor, Capability, PluginState};
