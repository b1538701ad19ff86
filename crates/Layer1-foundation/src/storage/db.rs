//! SQLite Storage for plugin records
//!
//! 플러그인 레코드 저장:
//! - plugins: 이름(PK), 버전, 라이프사이클 상태, 경로, 선언된 기능
//!
//! 상태 변경은 `state` 컬럼에 대한 compare-and-swap 으로만 이루어진다.
//! 감사 로그(audit_log)는 `audit::AuditLogger` 가 같은 DB 파일에서 관리.

use crate::core::{Capability, PluginState};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "gamepanel.db";

/// Storage service for persisting plugin records
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Path of the database file for a data directory
    pub fn database_path(data_dir: &Path) -> PathBuf {
        data_dir.join(DATABASE_FILE)
    }

    /// Create a new storage instance
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = Self::database_path(data_dir);
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode so the audit logger can write through its own connection
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        info!("Plugin storage opened at {}", db_path.display());

        Ok(storage)
    }

    /// Create an in-memory storage (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;

        Ok(storage)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Plugin records (one per name)
            CREATE TABLE IF NOT EXISTS plugins (
                name TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                state TEXT NOT NULL CHECK(state IN ('discovered', 'registered', 'enabled', 'disabled', 'faulted')),
                discovered_at TEXT NOT NULL,
                enabled_at TEXT,
                fault_reason TEXT,
                path TEXT NOT NULL,
                capabilities TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_plugins_state
                ON plugins(state);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| Error::Storage(format!("Failed to record schema version: {}", e)))?;

        Ok(())
    }

    // ========================================================================
    // Plugin Operations
    // ========================================================================

    /// Register a plugin (Discovered → Registered)
    ///
    /// 레코드가 없으면 `registered` 상태로 생성한다. 이미 있으면 버전, 경로,
    /// 기능만 갱신하고 상태는 그대로 둔다.
    pub fn register_plugin(&self, registration: &PluginRegistration) -> Result<RegisterOutcome> {
        let conn = self.lock()?;
        let capabilities = encode_capabilities(&registration.capabilities);

        let existing: Option<String> = conn
            .query_row(
                "SELECT version FROM plugins WHERE name = ?1",
                params![registration.name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to look up plugin: {}", e)))?;

        match existing {
            None => {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    r#"
                    INSERT INTO plugins (name, version, state, discovered_at, path, capabilities)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        registration.name,
                        registration.version,
                        PluginState::Registered.as_str(),
                        now,
                        registration.path.to_string_lossy(),
                        capabilities,
                    ],
                )
                .map_err(|e| Error::Storage(format!("Failed to register plugin: {}", e)))?;

                debug!(plugin = %registration.name, "Plugin record created");
                Ok(RegisterOutcome::Created)
            }
            Some(previous_version) => {
                conn.execute(
                    r#"
                    UPDATE plugins SET version = ?2, path = ?3, capabilities = ?4
                    WHERE name = ?1
                    "#,
                    params![
                        registration.name,
                        registration.version,
                        registration.path.to_string_lossy(),
                        capabilities,
                    ],
                )
                .map_err(|e| Error::Storage(format!("Failed to update plugin: {}", e)))?;

                if previous_version == registration.version {
                    Ok(RegisterOutcome::Unchanged)
                } else {
                    Ok(RegisterOutcome::Updated { previous_version })
                }
            }
        }
    }

    /// Get a plugin by name
    pub fn get_plugin(&self, name: &str) -> Result<Option<PluginRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            &format!("{} WHERE name = ?1", SELECT_PLUGIN),
            params![name],
            PluginRecord::from_row,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get plugin: {}", e)))
    }

    /// Get a plugin by name, failing with NotFound
    pub fn require_plugin(&self, name: &str) -> Result<PluginRecord> {
        self.get_plugin(name)?
            .ok_or_else(|| Error::NotFound(format!("plugin '{}'", name)))
    }

    /// Get all plugins ordered by name
    pub fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!("{} ORDER BY name", SELECT_PLUGIN))
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let plugins = stmt
            .query_map([], PluginRecord::from_row)
            .map_err(|e| Error::Storage(format!("Failed to query plugins: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(format!("Failed to read plugin row: {}", e)))?;

        Ok(plugins)
    }

    /// Get plugins in a given state
    pub fn plugins_in_state(&self, state: PluginState) -> Result<Vec<PluginRecord>> {
        Ok(self
            .list_plugins()?
            .into_iter()
            .filter(|p| p.state == state)
            .collect())
    }

    /// Compare-and-swap the lifecycle state
    ///
    /// `UPDATE ... WHERE name = ? AND state = ?` 가 한 행도 바꾸지 못하면
    /// `false` 를 돌려준다 (다른 호출자가 먼저 상태를 바꿈).
    pub fn transition_state(
        &self,
        name: &str,
        from: PluginState,
        to: PluginState,
        fault_reason: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let changed = conn
            .execute(
                UPDATE_STATE,
                params![name, from.as_str(), to.as_str(), now, fault_reason],
            )
            .map_err(|e| Error::Storage(format!("Failed to update plugin state: {}", e)))?;

        Ok(changed == 1)
    }

    /// Compare-and-swap several plugins in one transaction
    ///
    /// `(name, from, to)` 를 순서대로 적용한다. 하나라도 CAS 가 실패하면 전체를
    /// 롤백하고 `false` 를 돌려준다. `fault_reason` 은 모두 비운다.
    pub fn transition_many(&self, steps: &[(&str, PluginState, PluginState)]) -> Result<bool> {
        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        for &(name, from, to) in steps {
            let changed = tx
                .execute(
                    UPDATE_STATE,
                    params![name, from.as_str(), to.as_str(), now, None::<&str>],
                )
                .map_err(|e| Error::Storage(format!("Failed to update plugin state: {}", e)))?;

            if changed != 1 {
                tx.rollback()
                    .map_err(|e| Error::Storage(format!("Failed to roll back: {}", e)))?;
                return Ok(false);
            }
        }

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(true)
    }

    /// Count plugins by state
    pub fn count_by_state(&self) -> Result<Vec<(PluginState, u64)>> {
        let plugins = self.list_plugins()?;
        Ok(PluginState::ALL
            .into_iter()
            .map(|state| {
                let count = plugins.iter().filter(|p| p.state == state).count() as u64;
                (state, count)
            })
            .collect())
    }
}

const UPDATE_STATE: &str = r#"
    UPDATE plugins SET
        state = ?3,
        enabled_at = CASE WHEN ?3 = 'enabled' THEN ?4 ELSE enabled_at END,
        fault_reason = ?5
    WHERE name = ?1 AND state = ?2
"#;

const SELECT_PLUGIN: &str = r#"
    SELECT name, version, state, discovered_at, enabled_at, fault_reason, path, capabilities
    FROM plugins
"#;

fn encode_capabilities(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn conversion_error(index: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

// ============================================================================
// Data Models
// ============================================================================

/// 등록 요청 (매니페스트에서 추출)
#[derive(Debug, Clone)]
pub struct PluginRegistration {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub capabilities: Vec<Capability>,
}

/// 등록 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// 새 레코드 생성
    Created,
    /// 기존 레코드, 버전 동일
    Unchanged,
    /// 기존 레코드, 버전 변경
    Updated { previous_version: String },
}

/// Persisted plugin record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRecord {
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub discovered_at: DateTime<Utc>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub fault_reason: Option<String>,
    pub path: PathBuf,
    pub capabilities: Vec<Capability>,
}

impl PluginRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let state: String = row.get(2)?;
        let discovered_at: String = row.get(3)?;
        let enabled_at: Option<String> = row.get(4)?;
        let path: String = row.get(6)?;
        let capabilities: String = row.get(7)?;

        Ok(Self {
            name: row.get(0)?,
            version: row.get(1)?,
            state: state.parse().map_err(|e| conversion_error(2, e))?,
            discovered_at: parse_timestamp(3, &discovered_at)?,
            enabled_at: enabled_at
                .as_deref()
                .map(|raw| parse_timestamp(4, raw))
                .transpose()?,
            fault_reason: row.get(5)?,
            path: PathBuf::from(path),
            capabilities: capabilities
                .split(',')
                .filter(|token| !token.is_empty())
                .map(|token| token.parse().map_err(|e| conversion_error(7, e)))
                .collect::<rusqlite::Result<Vec<_>>>()?,
        })
    }

    /// 선언된 기능 보유 여부
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(name: &str, version: &str) -> PluginRegistration {
        PluginRegistration {
            name: name.to_string(),
            version: version.to_string(),
            path: PathBuf::from(format!("plugins/{}", name)),
            capabilities: vec![Capability::Routes, Capability::Widgets],
        }
    }

    #[test]
    fn test_in_memory_storage() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(storage.get_schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(storage.list_plugins().unwrap().is_empty());
    }

    #[test]
    fn test_register_creates_record() {
        let storage = Storage::in_memory().unwrap();

        let outcome = storage.register_plugin(&registration("reports", "1.0.0")).unwrap();
        assert_eq!(outcome, RegisterOutcome::Created);

        let record = storage.get_plugin("reports").unwrap().unwrap();
        assert_eq!(record.state, PluginState::Registered);
        assert_eq!(record.version, "1.0.0");
        assert!(record.has_capability(Capability::Routes));
        assert!(!record.has_capability(Capability::Cron));
        assert!(record.enabled_at.is_none());
    }

    #[test]
    fn test_reregister_keeps_state() {
        let storage = Storage::in_memory().unwrap();
        storage.register_plugin(&registration("reports", "1.0.0")).unwrap();
        assert!(storage
            .transition_state("reports", PluginState::Registered, PluginState::Enabled, None)
            .unwrap());

        let outcome = storage.register_plugin(&registration("reports", "1.1.0")).unwrap();
        assert_eq!(
            outcome,
            RegisterOutcome::Updated {
                previous_version: "1.0.0".to_string()
            }
        );

        let record = storage.require_plugin("reports").unwrap();
        assert_eq!(record.state, PluginState::Enabled);
        assert_eq!(record.version, "1.1.0");
        assert!(record.enabled_at.is_some());
    }

    #[test]
    fn test_transition_is_compare_and_swap() {
        let storage = Storage::in_memory().unwrap();
        storage.register_plugin(&registration("billing", "2.0.0")).unwrap();

        // 기대 상태가 다르면 아무 것도 바뀌지 않는다
        assert!(!storage
            .transition_state("billing", PluginState::Enabled, PluginState::Disabled, None)
            .unwrap());
        assert_eq!(
            storage.require_plugin("billing").unwrap().state,
            PluginState::Registered
        );

        assert!(storage
            .transition_state("billing", PluginState::Registered, PluginState::Enabled, None)
            .unwrap());
        assert!(storage
            .transition_state(
                "billing",
                PluginState::Enabled,
                PluginState::Faulted,
                Some("health_check_failed")
            )
            .unwrap());

        let record = storage.require_plugin("billing").unwrap();
        assert_eq!(record.state, PluginState::Faulted);
        assert_eq!(record.fault_reason.as_deref(), Some("health_check_failed"));
    }

    #[test]
    fn test_transition_many_rolls_back_on_stale_step() {
        let storage = Storage::in_memory().unwrap();
        for name in ["base", "addon"] {
            storage.register_plugin(&registration(name, "1.0.0")).unwrap();
            assert!(storage
                .transition_state(name, PluginState::Registered, PluginState::Enabled, None)
                .unwrap());
        }

        // addon 은 Registered 가 아니므로 두 번째 단계가 실패한다
        let applied = storage
            .transition_many(&[
                ("base", PluginState::Enabled, PluginState::Disabled),
                ("addon", PluginState::Registered, PluginState::Disabled),
            ])
            .unwrap();
        assert!(!applied);
        assert_eq!(storage.require_plugin("base").unwrap().state, PluginState::Enabled);
        assert_eq!(storage.require_plugin("addon").unwrap().state, PluginState::Enabled);

        let applied = storage
            .transition_many(&[
                ("addon", PluginState::Enabled, PluginState::Disabled),
                ("base", PluginState::Enabled, PluginState::Disabled),
            ])
            .unwrap();
        assert!(applied);
        assert_eq!(storage.require_plugin("base").unwrap().state, PluginState::Disabled);
        assert_eq!(storage.require_plugin("addon").unwrap().state, PluginState::Disabled);
    }

    #[test]
    fn test_require_missing_plugin() {
        let storage = Storage::in_memory().unwrap();
        assert!(matches!(
            storage.require_plugin("ghost"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_file_storage_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::new(dir.path()).unwrap();
            storage.register_plugin(&registration("tickets", "0.3.0")).unwrap();
        }

        let storage = Storage::new(dir.path()).unwrap();
        let plugins = storage.list_plugins().unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].name, "tickets");
    }
}
