//! Dependency Resolver - 플러그인 의존성 그래프
//!
//! - 버전 범위 검증 (`semver::VersionReq`)
//! - 순환 의존성 탐지 (DFS + recursion stack)
//! - 활성화 순서 계산 (Kahn, 동률은 이름 사전순)
//! - 역의존 플러그인 조회 (cascade disable 용)

use super::manifest::PluginManifest;
use gamepanel_foundation::{DependencyViolation, Error, PluginRecord, PluginState, Result};
use semver::{Version, VersionReq};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ============================================================================
// InstalledPlugin - 검증 입력
// ============================================================================

/// 의존성 검증에 필요한 설치 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPlugin {
    pub version: Version,
    pub state: PluginState,
}

impl InstalledPlugin {
    pub fn new(version: Version, state: PluginState) -> Self {
        Self { version, state }
    }

    /// 저장된 레코드에서 변환 (버전 파싱 실패 시 None)
    pub fn from_record(record: &PluginRecord) -> Option<Self> {
        Version::parse(&record.version)
            .ok()
            .map(|version| Self::new(version, record.state))
    }
}

/// 레코드 목록을 검증 입력으로 변환
pub fn installed_from_records<'a>(
    records: impl IntoIterator<Item = &'a PluginRecord>,
) -> BTreeMap<String, InstalledPlugin> {
    records
        .into_iter()
        .filter_map(|record| {
            InstalledPlugin::from_record(record).map(|installed| (record.name.clone(), installed))
        })
        .collect()
}

/// 매니페스트 의존성 검증
///
/// 모든 의존성이 설치되어 있고, `Enabled` 상태이며, 버전 범위를 만족해야 한다.
/// `graph` 에 후보 매니페스트를 넣었을 때 후보가 순환에 속하면 `Circular` 도
/// 함께 보고한다. 위반 사항을 모두 모아 돌려준다 (빈 벡터 = 통과).
pub fn validate_dependencies(
    manifest: &PluginManifest,
    installed: &BTreeMap<String, InstalledPlugin>,
    graph: &DependencyResolver,
) -> Vec<DependencyViolation> {
    let mut violations: Vec<DependencyViolation> = graph
        .with_manifest(manifest)
        .find_cycles()
        .into_iter()
        .filter(|cycle| cycle.contains(&manifest.name))
        .map(|cycle| DependencyViolation::Circular { cycle: cycle.cycle })
        .collect();

    for (dependency, required) in &manifest.dependencies {
        match installed.get(dependency) {
            None => violations.push(DependencyViolation::Missing {
                dependency: dependency.clone(),
                reason: "not installed".to_string(),
            }),
            Some(found) if !required.matches(&found.version) => {
                violations.push(DependencyViolation::VersionMismatch {
                    dependency: dependency.clone(),
                    required: required.to_string(),
                    installed: found.version.to_string(),
                })
            }
            Some(found) if found.state != PluginState::Enabled => {
                violations.push(DependencyViolation::Missing {
                    dependency: dependency.clone(),
                    reason: format!("not enabled (state: {})", found.state),
                })
            }
            Some(_) => {}
        }
    }

    violations
}

// ============================================================================
// DependencyCycle
// ============================================================================

/// 탐지된 순환 의존성
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCycle {
    /// 간선 순서의 순환 경로, 첫 노드로 닫힘 (예: `[a, b, a]`)
    pub cycle: Vec<String>,

    /// 순환에 속한 모든 플러그인 (강한 연결 요소)
    pub members: BTreeSet<String>,
}

impl DependencyCycle {
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    pub fn to_error(&self) -> Error {
        Error::CircularDependency {
            cycle: self.cycle.clone(),
        }
    }
}

// ============================================================================
// DependencyResolver
// ============================================================================

/// 의존성 그래프 ("A requires B" = A → B)
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    /// 플러그인 → 의존 대상 (집합 밖의 대상 포함)
    requires: BTreeMap<String, BTreeMap<String, VersionReq>>,
}

impl DependencyResolver {
    pub fn new<'a>(manifests: impl IntoIterator<Item = &'a PluginManifest>) -> Self {
        let requires = manifests
            .into_iter()
            .map(|m| (m.name.clone(), m.dependencies.clone()))
            .collect();
        Self { requires }
    }

    /// `manifest` 를 추가(같은 이름이면 교체)한 그래프
    pub fn with_manifest(&self, manifest: &PluginManifest) -> Self {
        let mut requires = self.requires.clone();
        requires.insert(manifest.name.clone(), manifest.dependencies.clone());
        Self { requires }
    }

    /// 그래프에 포함된 플러그인 수
    pub fn len(&self) -> usize {
        self.requires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requires.is_empty()
    }

    /// 집합 안에 있는 의존 대상만 (이름 순)
    fn edges<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.requires
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.keys())
            .filter(|dep| self.requires.contains_key(dep.as_str()))
            .map(|dep| dep.as_str())
    }

    // ========================================================================
    // 순환 탐지
    // ========================================================================

    /// 모든 순환 의존성 탐지
    ///
    /// 순환 하나당 하나의 `DependencyCycle`. 멤버는 서로 도달 가능한 노드 전체.
    pub fn find_cycles(&self) -> Vec<DependencyCycle> {
        let mut raw_cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut rec_stack = BTreeSet::new();
        let mut path = Vec::new();

        for node in self.requires.keys() {
            if !visited.contains(node.as_str()) {
                self.dfs_find_cycles(node, &mut visited, &mut rec_stack, &mut path, &mut raw_cycles);
            }
        }

        // 같은 강한 연결 요소에 속한 순환은 하나로 묶는다
        let mut cycles: Vec<DependencyCycle> = Vec::new();
        for cycle in raw_cycles {
            let Some(first) = cycle.first() else { continue };
            if cycles.iter().any(|known| known.contains(first)) {
                continue;
            }
            let members = self.strongly_connected(first);
            debug!(cycle = ?cycle, members = ?members, "Dependency cycle detected");
            cycles.push(DependencyCycle { cycle, members });
        }

        cycles
    }

    fn dfs_find_cycles<'a>(
        &'a self,
        node: &'a str,
        visited: &mut BTreeSet<&'a str>,
        rec_stack: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for neighbor in self.edges(node) {
            if !visited.contains(neighbor) {
                self.dfs_find_cycles(neighbor, visited, rec_stack, path, cycles);
            } else if rec_stack.contains(neighbor) {
                // back-edge: path[start..] + neighbor
                if let Some(start) = path.iter().position(|&x| x == neighbor) {
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(neighbor.to_string());
                    cycles.push(cycle);
                }
            }
        }

        rec_stack.remove(node);
        path.pop();
    }

    /// `from` 에서 간선을 따라 도달 가능한 노드 (자기 자신은 순환일 때만 포함)
    fn reachable(&self, from: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.edges(from).collect();

        while let Some(node) = stack.pop() {
            if seen.insert(node.to_string()) {
                stack.extend(self.edges(node));
            }
        }

        seen
    }

    fn strongly_connected(&self, node: &str) -> BTreeSet<String> {
        self.reachable(node)
            .into_iter()
            .filter(|other| self.reachable(other).contains(node))
            .collect()
    }

    // ========================================================================
    // 활성화 순서
    // ========================================================================

    /// 활성화 순서 계산 (Kahn)
    ///
    /// 모든 플러그인이 자신의 의존 대상 뒤에 온다. 집합 밖의 의존성은 무시.
    pub fn compute_activation_order(&self) -> Result<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .requires
            .keys()
            .map(|name| (name.as_str(), self.edges(name).count()))
            .collect();

        // 역방향 간선: 의존 대상 → 의존하는 플러그인
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for name in self.requires.keys() {
            for dep in self.edges(name) {
                dependents.entry(dep).or_default().push(name.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&name, _)| name)
            .collect();

        let mut order = Vec::with_capacity(self.requires.len());
        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());

            for &dependent in dependents.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < self.requires.len() {
            let cycle = self
                .find_cycles()
                .into_iter()
                .next()
                .map(|c| c.cycle)
                .unwrap_or_default();
            return Err(Error::CircularDependency { cycle });
        }

        Ok(order)
    }

    // ========================================================================
    // 역의존
    // ========================================================================

    /// `name` 에 (직접/간접) 의존하는 플러그인, 가장 깊은 것부터
    ///
    /// 반환 순서대로 비활성화하면 항상 의존하는 쪽이 먼저 꺼진다.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let members: BTreeSet<&str> = self
            .requires
            .keys()
            .filter(|candidate| candidate.as_str() != name)
            .filter(|candidate| self.reachable(candidate).contains(name))
            .map(|candidate| candidate.as_str())
            .collect();

        if members.is_empty() {
            return Vec::new();
        }

        let subgraph = DependencyResolver {
            requires: self
                .requires
                .iter()
                .filter(|(candidate, _)| members.contains(candidate.as_str()))
                .map(|(candidate, deps)| (candidate.clone(), deps.clone()))
                .collect(),
        };

        match subgraph.compute_activation_order() {
            Ok(mut order) => {
                order.reverse();
                order
            }
            // 순환이 있으면 이름 역순으로라도 돌려준다
            Err(_) => members.into_iter().rev().map(str::to_string).collect(),
        }
    }
}
