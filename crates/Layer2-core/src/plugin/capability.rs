//! Capability Registry - 플러그인별 기능 부여 (CapabilityGrant)
//!
//! 부여는 Registered 전이 시점에 매니페스트에서 고정되며, 재발견 때만 교체된다.
//! 부여되지 않은 기능이 필요한 작업은 항상 실패한다 (fail closed).

use gamepanel_foundation::{Capability, Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// 플러그인 → 부여된 기능
#[derive(Default)]
pub struct CapabilityRegistry {
    grants: RwLock<HashMap<String, BTreeSet<Capability>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기능 등록 (이전 부여 집합을 통째로 교체)
    pub fn register_capabilities(
        &self,
        plugin: &str,
        declared: impl IntoIterator<Item = Capability>,
    ) {
        let declared: BTreeSet<Capability> = declared.into_iter().collect();
        debug!(plugin, capabilities = ?declared, "Capabilities registered");
        self.grants.write().insert(plugin.to_string(), declared);
    }

    /// 플러그인의 부여 제거
    pub fn revoke(&self, plugin: &str) {
        self.grants.write().remove(plugin);
    }

    /// 기능 보유 여부 (실패하지 않는 조회)
    pub fn has_capability(&self, plugin: &str, capability: Capability) -> bool {
        self.grants
            .read()
            .get(plugin)
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false)
    }

    /// 기능 보유 확인, 없으면 `Error::Capability`
    pub fn assert_capability(
        &self,
        plugin: &str,
        capability: Capability,
        operation: &str,
    ) -> Result<()> {
        if self.has_capability(plugin, capability) {
            Ok(())
        } else {
            Err(Error::capability(plugin, capability, operation))
        }
    }

    /// 플러그인에 부여된 기능 목록
    pub fn capabilities_of(&self, plugin: &str) -> BTreeSet<Capability> {
        self.grants.read().get(plugin).cloned().unwrap_or_default()
    }

    /// 등록된 플러그인인지
    pub fn is_registered(&self, plugin: &str) -> bool {
        self.grants.read().contains_key(plugin)
    }
}
