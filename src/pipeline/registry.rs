use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub mime: String,
    #[serde(skip)]
    pub thumbnail: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub id: String,
    pub original_id: String,
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub operation: String,
    pub timestamp: i64,
    #[serde(skip)]
    pub thumbnail: Option<PathBuf>,
    pub size: u64,
    pub original_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ResultRecord {
    pub fn new_id() -> String {
        format!("result_{}", Uuid::new_v4().simple())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionRecords {
    pub uploads: Vec<UploadRecord>,
    pub results: Vec<ResultRecord>,
}

impl SessionRecords {
    /// Every file the session references, thumbnails included.
    pub fn files(&self) -> Vec<PathBuf> {
        let uploads = self
            .uploads
            .iter()
            .flat_map(|u| std::iter::once(u.path.clone()).chain(u.thumbnail.clone()));
        let results = self
            .results
            .iter()
            .flat_map(|r| std::iter::once(r.path.clone()).chain(r.thumbnail.clone()));
        uploads.chain(results).collect()
    }
}

#[derive(Debug)]
struct SessionEntry {
    records: SessionRecords,
    last_seen: DateTime<Utc>,
}

/// Uploads and produced results, scoped per session id and dropped after
/// `lifetime` of inactivity.
#[derive(Debug)]
pub struct ResultRegistry {
    lifetime: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl ResultRegistry {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<T>(&self, session_id: &str, f: impl FnOnce(&mut SessionRecords) -> T) -> T {
        let mut sessions = self.sessions();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                records: SessionRecords::default(),
                last_seen: Utc::now(),
            });
        entry.last_seen = Utc::now();
        f(&mut entry.records)
    }

    pub fn register_upload(&self, session_id: &str, upload: UploadRecord) {
        self.with_session(session_id, |records| records.uploads.push(upload));
    }

    pub fn find_upload(&self, session_id: &str, upload_id: &str) -> Option<UploadRecord> {
        self.with_session(session_id, |records| {
            records
                .uploads
                .iter()
                .find(|u| u.id == upload_id)
                .cloned()
        })
    }

    pub fn register_result(&self, session_id: &str, result: ResultRecord) {
        self.with_session(session_id, |records| records.results.push(result));
    }

    pub fn list_results(&self, session_id: &str) -> Vec<ResultRecord> {
        self.with_session(session_id, |records| records.results.clone())
    }

    pub fn find_result(&self, session_id: &str, result_id: &str) -> Option<ResultRecord> {
        self.with_session(session_id, |records| {
            records
                .results
                .iter()
                .find(|r| r.id == result_id)
                .cloned()
        })
    }

    pub fn remove_result(&self, session_id: &str, result_id: &str) -> Option<ResultRecord> {
        self.with_session(session_id, |records| {
            let position = records.results.iter().position(|r| r.id == result_id)?;
            Some(records.results.remove(position))
        })
    }

    /// Drops sessions idle for longer than the lifetime and hands back their records.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<SessionRecords> {
        let mut sessions = self.sessions();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| now - entry.last_seen > self.lifetime)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                debug!(session = %id, "session expired");
                sessions.remove(id.as_str()).map(|entry| entry.records)
            })
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(id: &str) -> UploadRecord {
        UploadRecord {
            id: id.to_string(),
            name: String::from("cat.png"),
            path: PathBuf::from(format!("uploads/{id}.png")),
            size: 1024,
            mime: String::from("image/png"),
            thumbnail: Some(PathBuf::from(format!("uploads/{id}_thumb.png"))),
        }
    }

    fn result(id: &str, original_id: &str) -> ResultRecord {
        ResultRecord {
            id: id.to_string(),
            original_id: original_id.to_string(),
            name: String::from("optimized_cat.png"),
            path: PathBuf::from(format!("uploads/{id}.png")),
            operation: String::from("optimize"),
            timestamp: 1_700_000_000,
            thumbnail: None,
            size: 512,
            original_size: 1024,
            savings_percent: Some(50.0),
            format: Some(String::from("png")),
        }
    }

    #[test]
    fn records_are_scoped_to_their_session() {
        let registry = ResultRegistry::new(Duration::minutes(120));
        registry.register_upload("s1", upload("file_a"));
        registry.register_result("s1", result("result_a", "file_a"));

        assert!(registry.find_upload("s1", "file_a").is_some());
        assert!(registry.find_upload("s2", "file_a").is_none());
        assert_eq!(registry.list_results("s1").len(), 1);
        assert!(registry.list_results("s2").is_empty());
        assert!(registry.find_result("s2", "result_a").is_none());
    }

    #[test]
    fn remove_result_is_single_shot() {
        let registry = ResultRegistry::new(Duration::minutes(120));
        registry.register_result("s1", result("result_a", "file_a"));
        registry.register_result("s1", result("result_b", "file_a"));

        let removed = registry
            .remove_result("s1", "result_a")
            .expect("result should be removed");
        assert_eq!(removed.id, "result_a");
        assert!(registry.remove_result("s1", "result_a").is_none());
        let remaining: Vec<String> = registry
            .list_results("s1")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(remaining, vec![String::from("result_b")]);
    }

    #[test]
    fn purge_expired_returns_idle_sessions_only() {
        let registry = ResultRegistry::new(Duration::minutes(30));
        registry.register_upload("old", upload("file_old"));
        registry.register_result("old", result("result_old", "file_old"));
        registry.register_upload("fresh", upload("file_fresh"));

        assert!(registry.purge_expired(Utc::now()).is_empty());

        let later = Utc::now() + Duration::minutes(31);
        let purged = registry.purge_expired(later);
        assert_eq!(purged.len(), 2);
        assert_eq!(registry.session_count(), 0);

        let files: Vec<PathBuf> = purged.iter().flat_map(SessionRecords::files).collect();
        assert!(files.contains(&PathBuf::from("uploads/file_old.png")));
        assert!(files.contains(&PathBuf::from("uploads/file_old_thumb.png")));
        assert!(files.contains(&PathBuf::from("uploads/result_old.png")));
    }

    #[test]
    fn serialized_records_hide_filesystem_paths() {
        let value = serde_json::to_value(result("result_a", "file_a")).expect("serialize");
        assert!(value.get("path").is_none());
        assert_eq!(value["original_id"], "file_a");
        assert_eq!(value["savings_percent"], 50.0);
    }
}
