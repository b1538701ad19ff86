//! Audit Logger - 감사 로그 기록 및 관리
//!
//! 감사 로그를 SQLite에 저장하고 조회하는 기능을 제공합니다.
//! 기록 실패는 호출자에게 전파되지 않고 카운트만 증가한다.

use super::types::{AuditId, AuditQuery, AuditRecord, AuditStatistics};
use crate::core::PluginState;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

// ============================================================================
// AuditLogger
// ============================================================================

/// 감사 로거
///
/// 라이프사이클 전이를 append-only 테이블 `audit_log` 에 기록합니다.
///
/// ## 사용법
///
/// ```ignore
/// use gamepanel_foundation::audit::{AuditLogger, AuditRecord};
///
/// let logger = AuditLogger::open(&db_path)?;
///
/// logger
///     .log(AuditRecord::transition("reports", from, to, Actor::System))
///     .await;
///
/// let history = logger.for_plugin("reports").await?;
/// ```
pub struct AuditLogger {
    /// SQLite 연결
    db: Mutex<Connection>,

    /// 데이터베이스 경로
    db_path: PathBuf,

    /// 기록 실패 횟수
    failed_writes: AtomicU64,
}

impl AuditLogger {
    /// 파일 기반 감사 로거 생성
    pub fn open(db_path: &Path) -> crate::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::init_tables(&conn)?;

        info!(db_path = %db_path.display(), "Audit logger initialized");

        Ok(Self {
            db: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
            failed_writes: AtomicU64::new(0),
        })
    }

    /// 인메모리 로거 생성 (테스트용)
    pub fn in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;

        Ok(Self {
            db: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
            failed_writes: AtomicU64::new(0),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 테이블 초기화
    fn init_tables(db: &Connection) -> crate::Result<()> {
        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                plugin TEXT NOT NULL,
                from_state TEXT NOT NULL,
                to_state TEXT NOT NULL,
                actor TEXT NOT NULL,
                reason TEXT
            )
            "#,
            [],
        )?;

        // 인덱스 생성
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_plugin ON audit_log(plugin, timestamp)",
            [],
        )?;

        Ok(())
    }

    /// 감사 로그 기록
    ///
    /// 실패해도 에러를 돌려주지 않는다. `failed_writes()` 로 확인.
    pub async fn log(&self, record: AuditRecord) -> Option<AuditId> {
        match self.try_log(&record).await {
            Ok(id) => Some(id),
            Err(e) => {
                let failures = self.failed_writes.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    error = %e,
                    plugin = %record.plugin,
                    to_state = %record.to_state,
                    failures,
                    "Failed to write audit record"
                );
                None
            }
        }
    }

    async fn try_log(&self, record: &AuditRecord) -> crate::Result<AuditId> {
        let db = self.db.lock().await;

        db.execute(
            r#"
            INSERT INTO audit_log (id, timestamp, plugin, from_state, to_state, actor, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.id.0,
                format_timestamp(&record.timestamp),
                record.plugin,
                record.from_state.as_str(),
                record.to_state.as_str(),
                record.actor.to_string(),
                record.reason,
            ],
        )?;

        debug!(
            audit_id = %record.id,
            plugin = %record.plugin,
            from = %record.from_state,
            to = %record.to_state,
            actor = %record.actor,
            "Audit record logged"
        );

        Ok(record.id.clone())
    }

    /// 기록 실패 횟수
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// ID로 감사 로그 조회
    pub async fn get(&self, id: &AuditId) -> crate::Result<Option<AuditRecord>> {
        let db = self.db.lock().await;

        let record = db
            .query_row(
                "SELECT * FROM audit_log WHERE id = ?1",
                params![id.0],
                Self::row_to_record,
            )
            .optional()?;

        Ok(record)
    }

    /// 쿼리로 감사 로그 조회 (최신순)
    pub async fn query(&self, query: &AuditQuery) -> crate::Result<Vec<AuditRecord>> {
        let db = self.db.lock().await;

        let mut sql = String::from("SELECT * FROM audit_log WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        // 플러그인 필터
        if let Some(ref plugin) = query.plugin {
            sql.push_str(" AND plugin = ?");
            params_vec.push(Box::new(plugin.clone()));
        }

        // 도착 상태 필터
        if let Some(ref states) = query.to_states {
            let placeholders: Vec<String> = states.iter().map(|_| "?".to_string()).collect();
            sql.push_str(&format!(" AND to_state IN ({})", placeholders.join(", ")));
            for state in states {
                params_vec.push(Box::new(state.as_str().to_string()));
            }
        }

        // 주체 필터
        if let Some(ref actor) = query.actor {
            sql.push_str(" AND actor = ?");
            params_vec.push(Box::new(actor.to_string()));
        }

        // 시간 범위 필터
        if let Some(ref from) = query.from {
            sql.push_str(" AND timestamp >= ?");
            params_vec.push(Box::new(format_timestamp(from)));
        }
        if let Some(ref to) = query.to {
            sql.push_str(" AND timestamp <= ?");
            params_vec.push(Box::new(format_timestamp(to)));
        }

        // 같은 시각이면 삽입 순서의 역순
        sql.push_str(" ORDER BY timestamp DESC, rowid DESC");

        // 페이지네이션
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        } else if query.offset.is_some() {
            sql.push_str(" LIMIT -1");
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut stmt = db.prepare(&sql)?;
        let records = stmt
            .query_map(params_refs.as_slice(), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    /// 플러그인별 감사 로그 (최신순)
    pub async fn for_plugin(&self, plugin: &str) -> crate::Result<Vec<AuditRecord>> {
        self.query(&AuditQuery::new().with_plugin(plugin)).await
    }

    /// 최근 감사 로그 조회
    pub async fn recent(&self, limit: usize) -> crate::Result<Vec<AuditRecord>> {
        self.query(&AuditQuery::new().with_limit(limit)).await
    }

    /// 통계 계산
    pub async fn statistics(&self) -> crate::Result<AuditStatistics> {
        let db = self.db.lock().await;

        let total_entries: u64 =
            db.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;

        // 도착 상태별 카운트
        let mut by_to_state = std::collections::HashMap::new();
        let mut stmt = db.prepare("SELECT to_state, COUNT(*) FROM audit_log GROUP BY to_state")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let state: String = row.get(0)?;
            let count: u64 = row.get(1)?;
            by_to_state.insert(state, count);
        }

        // 플러그인별 카운트
        let mut by_plugin = std::collections::HashMap::new();
        let mut stmt = db.prepare("SELECT plugin, COUNT(*) FROM audit_log GROUP BY plugin")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let plugin: String = row.get(0)?;
            let count: u64 = row.get(1)?;
            by_plugin.insert(plugin, count);
        }

        let (start, end): (Option<String>, Option<String>) = db.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM audit_log",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(AuditStatistics {
            total_entries,
            by_to_state,
            by_plugin,
            failed_writes: self.failed_writes(),
            period_start: start.as_deref().and_then(parse_timestamp),
            period_end: end.as_deref().and_then(parse_timestamp),
        })
    }

    /// 행을 AuditRecord로 변환
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AuditRecord> {
        let id: String = row.get("id")?;
        let timestamp: String = row.get("timestamp")?;
        let from_state: String = row.get("from_state")?;
        let to_state: String = row.get("to_state")?;
        let actor: String = row.get("actor")?;

        Ok(AuditRecord {
            id: AuditId(id),
            timestamp: parse_timestamp(&timestamp).unwrap_or_else(chrono::Utc::now),
            plugin: row.get("plugin")?,
            from_state: parse_state(&from_state)?,
            to_state: parse_state(&to_state)?,
            actor: actor.parse().map_err(conversion_error)?,
            reason: row.get("reason")?,
        })
    }
}

// ============================================================================
// 헬퍼 함수
// ============================================================================

/// 고정 폭 포맷 (문자열 정렬 = 시간 정렬)
fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .ok()
}

fn parse_state(raw: &str) -> rusqlite::Result<PluginState> {
    raw.parse().map_err(conversion_error)
}

fn conversion_error(e: crate::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

// ============================================================================
// 테스트
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Actor;

    fn record(plugin: &str, from: PluginState, to: PluginState) -> AuditRecord {
        AuditRecord::transition(plugin, from, to, Actor::System)
    }

    #[tokio::test]
    async fn test_audit_logger_basic() {
        let logger = AuditLogger::in_memory().unwrap();

        let entry = record("reports", PluginState::Registered, PluginState::Enabled)
            .with_reason("operator request");
        let id = logger.log(entry).await.unwrap();

        let retrieved = logger.get(&id).await.unwrap().unwrap();
        assert_eq!(retrieved.plugin, "reports");
        assert_eq!(retrieved.to_state, PluginState::Enabled);
        assert_eq!(retrieved.actor, Actor::System);
        assert_eq!(retrieved.reason.as_deref(), Some("operator request"));
    }

    #[tokio::test]
    async fn test_for_plugin_newest_first() {
        let logger = AuditLogger::in_memory().unwrap();

        logger
            .log(record("billing", PluginState::Discovered, PluginState::Registered))
            .await;
        logger
            .log(record("billing", PluginState::Registered, PluginState::Enabled))
            .await;
        logger
            .log(record("reports", PluginState::Discovered, PluginState::Registered))
            .await;

        let history = logger.for_plugin("billing").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_state, PluginState::Enabled);
        assert_eq!(history[1].to_state, PluginState::Registered);

        let recent = logger.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].plugin, "reports");
    }

    #[tokio::test]
    async fn test_audit_statistics() {
        let logger = AuditLogger::in_memory().unwrap();

        logger
            .log(record("a", PluginState::Registered, PluginState::Enabled))
            .await;
        logger
            .log(record("a", PluginState::Enabled, PluginState::Faulted))
            .await;
        logger
            .log(record("b", PluginState::Registered, PluginState::Enabled))
            .await;

        let stats = logger.statistics().await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_to_state.get("enabled"), Some(&2));
        assert_eq!(stats.by_plugin.get("a"), Some(&2));
        assert!(stats.period_start.is_some());
    }

    #[tokio::test]
    async fn test_write_failure_is_counted_not_raised() {
        let logger = AuditLogger::in_memory().unwrap();
        logger
            .db
            .lock()
            .await
            .execute("DROP TABLE audit_log", [])
            .unwrap();

        let id = logger
            .log(record("a", PluginState::Registered, PluginState::Enabled))
            .await;
        assert!(id.is_none());
        assert_eq!(logger.failed_writes(), 1);
    }

    #[tokio::test]
    async fn test_file_logger_shares_database_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = crate::storage::Storage::new(dir.path()).unwrap();
        let db_path = crate::storage::Storage::database_path(dir.path());

        let logger = AuditLogger::open(&db_path).unwrap();
        logger
            .log(record("a", PluginState::Discovered, PluginState::Registered))
            .await;

        assert_eq!(logger.failed_writes(), 0);
        assert_eq!(logger.for_plugin("a").await.unwrap().len(), 1);
        drop(storage);
    }
}
