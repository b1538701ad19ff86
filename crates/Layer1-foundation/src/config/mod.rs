//! Config - 런타임 설정 관리
//!
//! - `runtime.rs` - RuntimeConfig (플러그인 루트, 데이터 디렉토리, 헬스 체크, 설치)

mod runtime;

pub use runtime::{HealthSettings, InstallerSettings, RuntimeConfig, RUNTIME_CONFIG_FILE};
