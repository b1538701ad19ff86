//! Plugin Manifest - 플러그인 메타데이터 정의
//!
//! 각 플러그인 디렉토리의 `plugin.json` 을 읽어 검증된 `PluginManifest` 로 만든다.

use gamepanel_foundation::{Capability, Error, Result};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// 매니페스트 파일 이름
pub const MANIFEST_FILE: &str = "plugin.json";

/// 플러그인 이름 최대 길이
const MAX_NAME_LEN: usize = 64;

// ============================================================================
// PluginManifest
// ============================================================================

/// 플러그인 매니페스트 - 검증이 끝난 불변 값
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginManifest {
    /// 고유 이름 (slug, 예: "core-analytics")
    pub name: String,

    /// 시맨틱 버전
    pub version: Version,

    /// 설명
    pub description: Option<String>,

    /// 작성자
    pub author: Option<String>,

    /// 선언된 기능
    pub capabilities: BTreeSet<Capability>,

    /// 의존성: 플러그인 이름 → 버전 범위
    pub dependencies: BTreeMap<String, VersionReq>,

    /// 관례 기반 진입점 디렉토리
    pub entry_points: EntryPoints,
}

impl PluginManifest {
    /// 새 매니페스트 생성 (이름 검증 포함)
    pub fn new(name: impl Into<String>, version: Version) -> Result<Self> {
        let name = name.into();
        validate_slug(&name).map_err(|message| Error::manifest(MANIFEST_FILE, message))?;

        Ok(Self {
            name,
            version,
            description: None,
            author: None,
            capabilities: BTreeSet::new(),
            dependencies: BTreeMap::new(),
            entry_points: EntryPoints::default(),
        })
    }

    /// 빌더 패턴: 설명 설정
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// 빌더 패턴: 작성자 설정
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// 빌더 패턴: 기능 추가
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// 빌더 패턴: 의존성 추가
    pub fn with_dependency(mut self, name: impl Into<String>, req: VersionReq) -> Self {
        self.dependencies.insert(name.into(), req);
        self
    }

    /// 기능 선언 여부
    pub fn declares(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    // ========================================================================
    // JSON
    // ========================================================================

    /// JSON 문자열 파싱 (`path` 는 에러 메시지용)
    pub fn from_json(raw: &str, path: &Path) -> Result<Self> {
        let file: PluginJsonFile = serde_json::from_str(raw)
            .map_err(|e| Error::manifest(path, format!("malformed JSON: {}", e)))?;
        file.into_manifest(path)
    }

    /// JSON 문자열로 직렬화
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&PluginJsonFile::from(self))?)
    }
}

// ============================================================================
// EntryPoints
// ============================================================================

/// 관례 기반 진입점 디렉토리 (플러그인 디렉토리 기준 상대 경로)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoints {
    #[serde(default = "default_routes")]
    pub routes: String,

    #[serde(default = "default_commands")]
    pub commands: String,

    #[serde(default = "default_cron")]
    pub cron: String,

    #[serde(default = "default_widgets")]
    pub widgets: String,

    #[serde(default = "default_tabs")]
    pub tabs: String,
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            routes: default_routes(),
            commands: default_commands(),
            cron: default_cron(),
            widgets: default_widgets(),
            tabs: default_tabs(),
        }
    }
}

fn default_routes() -> String {
    "routes".to_string()
}

fn default_commands() -> String {
    "commands".to_string()
}

fn default_cron() -> String {
    "cron".to_string()
}

fn default_widgets() -> String {
    "widgets".to_string()
}

fn default_tabs() -> String {
    "tabs".to_string()
}

// ============================================================================
// plugin.json 파일 포맷
// ============================================================================

/// plugin.json 원본 구조 (검증 전)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginJsonFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,

    #[serde(default)]
    capabilities: Vec<String>,

    #[serde(default)]
    dependencies: BTreeMap<String, String>,

    #[serde(default)]
    entry_points: EntryPoints,
}

impl PluginJsonFile {
    fn into_manifest(self, path: &Path) -> Result<PluginManifest> {
        let name = self
            .name
            .ok_or_else(|| Error::manifest(path, "missing required field 'name'"))?;
        validate_slug(&name).map_err(|message| Error::manifest(path, message))?;

        let raw_version = self
            .version
            .ok_or_else(|| Error::manifest(path, "missing required field 'version'"))?;
        let version = Version::parse(&raw_version).map_err(|e| {
            Error::manifest(path, format!("invalid version '{}': {}", raw_version, e))
        })?;

        // 알 수 없는 기능은 매니페스트 오류가 아니라 기능 오류
        let capabilities = self
            .capabilities
            .iter()
            .map(|token| token.parse::<Capability>())
            .collect::<Result<BTreeSet<_>>>()?;

        let mut dependencies = BTreeMap::new();
        for (dep, constraint) in self.dependencies {
            validate_slug(&dep).map_err(|message| {
                Error::manifest(path, format!("dependency {}", message))
            })?;
            if dep == name {
                return Err(Error::manifest(path, "plugin cannot depend on itself"));
            }
            let req = VersionReq::parse(&constraint).map_err(|e| {
                Error::manifest(
                    path,
                    format!("invalid version constraint '{}' for '{}': {}", constraint, dep, e),
                )
            })?;
            dependencies.insert(dep, req);
        }

        Ok(PluginManifest {
            name,
            version,
            description: self.description,
            author: self.author,
            capabilities,
            dependencies,
            entry_points: self.entry_points,
        })
    }
}

impl From<&PluginManifest> for PluginJsonFile {
    fn from(manifest: &PluginManifest) -> Self {
        Self {
            name: Some(manifest.name.clone()),
            version: Some(manifest.version.to_string()),
            description: manifest.description.clone(),
            author: manifest.author.clone(),
            capabilities: manifest
                .capabilities
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            dependencies: manifest
                .dependencies
                .iter()
                .map(|(name, req)| (name.clone(), req.to_string()))
                .collect(),
            entry_points: manifest.entry_points.clone(),
        }
    }
}

/// 이름 규칙: 소문자/숫자로 시작, 소문자/숫자/'-'/'_', 최대 64자
fn validate_slug(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name '{}' exceeds {} characters", name, MAX_NAME_LEN));
    }

    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');

    if starts_ok && rest_ok {
        Ok(())
    } else {
        Err(format!("name '{}' is not a valid slug", name))
    }
}

// ============================================================================
// Loader
// ============================================================================

/// 디렉토리에서 매니페스트 로드
pub async fn load_manifest(dir: &Path) -> Result<PluginManifest> {
    let path = dir.join(MANIFEST_FILE);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| Error::manifest(&path, format!("cannot read manifest: {}", e)))?;
    PluginManifest::from_json(&raw, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(raw: &str) -> Result<PluginManifest> {
        PluginManifest::from_json(raw, &PathBuf::from("plugins/test/plugin.json"))
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest = parse(
            r#"{
                "name": "reports",
                "version": "1.0.0",
                "description": "Revenue reports",
                "capabilities": ["routes", "widgets"],
                "dependencies": { "core-analytics": ">=1.2.0" },
                "entryPoints": { "routes": "http" }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.name, "reports");
        assert_eq!(manifest.version, Version::new(1, 0, 0));
        assert!(manifest.declares(Capability::Routes));
        assert!(manifest.declares(Capability::Widgets));
        assert!(!manifest.declares(Capability::Cron));
        assert!(manifest.dependencies["core-analytics"].matches(&Version::new(1, 2, 0)));
        assert_eq!(manifest.entry_points.routes, "http");
        assert_eq!(manifest.entry_points.commands, "commands");
    }

    #[test]
    fn test_missing_required_fields() {
        let err = parse(r#"{ "version": "1.0.0" }"#).unwrap_err();
        assert!(matches!(err, Error::Manifest { ref message, .. } if message.contains("'name'")));

        let err = parse(r#"{ "name": "billing" }"#).unwrap_err();
        assert!(matches!(err, Error::Manifest { ref message, .. } if message.contains("'version'")));
    }

    #[test]
    fn test_malformed_json_and_bad_values() {
        assert!(matches!(parse("{ nope"), Err(Error::Manifest { .. })));
        assert!(matches!(
            parse(r#"{ "name": "Billing Plugin", "version": "1.0.0" }"#),
            Err(Error::Manifest { .. })
        ));
        assert!(matches!(
            parse(r#"{ "name": "billing", "version": "one" }"#),
            Err(Error::Manifest { .. })
        ));
        assert!(matches!(
            parse(r#"{ "name": "billing", "version": "1.0.0", "dependencies": { "core": "not a range" } }"#),
            Err(Error::Manifest { .. })
        ));
    }

    #[test]
    fn test_unknown_capability_is_capability_error() {
        let err = parse(r#"{ "name": "billing", "version": "1.0.0", "capabilities": ["routes", "payments"] }"#)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownCapability { ref token } if token == "payments"));
    }

    #[test]
    fn test_round_trip_keeps_every_field() {
        let original = PluginManifest::new("tickets", Version::parse("2.1.0-beta.1").unwrap())
            .unwrap()
            .with_description("Support tickets")
            .with_author("Panel Team")
            .with_capability(Capability::Console)
            .with_capability(Capability::Tabs)
            .with_dependency("core-analytics", VersionReq::parse("^1.2").unwrap())
            .with_dependency("billing", VersionReq::parse(">=2.0.0, <3.0.0").unwrap());

        let json = original.to_json().unwrap();
        let reparsed = parse(&json).unwrap();
        assert_eq!(reparsed, original);
    }

    #[tokio::test]
    async fn test_load_manifest_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_manifest(dir.path()).await,
            Err(Error::Manifest { .. })
        ));

        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{ "name": "core-analytics", "version": "1.1.0", "capabilities": ["events"] }"#,
        )
        .unwrap();
        let manifest = load_manifest(dir.path()).await.unwrap();
        assert_eq!(manifest.name, "core-analytics");
        assert!(manifest.dependencies.is_empty());
    }
}
