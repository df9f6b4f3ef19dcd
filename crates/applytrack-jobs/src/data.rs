use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use applytrack_core::{JsonFileStore, SnapshotStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::DataError;
use crate::ports::{Application, ApplicationStatus, DataAccess, Digest};

/// [`DataAccess`] over a JSON export of application records.
///
/// The file is read once on open; purges rewrite it. Only closed
/// applications (rejected or withdrawn) are ever purged.
pub struct JsonFileData {
    store: JsonFileStore<Vec<Application>>,
    records: Mutex<Vec<Application>>,
}

impl JsonFileData {
    /// Open `path`; a missing file is an empty data set.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DataError> {
        let store: JsonFileStore<Vec<Application>> = JsonFileStore::new(path);
        let records = store.load()?.unwrap_or_default();
        info!(path = %store.path().display(), count = records.len(), "application data loaded");
        Ok(Self {
            store,
            records: Mutex::new(records),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Application>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DataAccess for JsonFileData {
    async fn stale_applications(
        &self,
        user_id: &str,
        older_than: DateTime<Utc>,
        statuses: &[ApplicationStatus],
    ) -> Result<Vec<Application>, DataError> {
        let mut stale: Vec<Application> = self
            .lock()
            .iter()
            .filter(|a| {
                a.user_id == user_id && a.updated_at < older_than && statuses.contains(&a.status)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|a| a.updated_at);
        Ok(stale)
    }

    async fn digest(&self, user_id: &str, since: DateTime<Utc>) -> Result<Digest, DataError> {
        let records = self.lock();
        let mut digest = Digest::default();
        for app in records.iter().filter(|a| a.user_id == user_id) {
            if app.applied_at >= since {
                digest.submitted += 1;
            }
            if app.updated_at >= since && app.updated_at > app.applied_at {
                *digest.status_changes.entry(app.status).or_default() += 1;
            }
            if !app.status.is_closed() {
                digest.open += 1;
            }
        }
        Ok(digest)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DataError> {
        let mut records = self.lock();
        let before = records.len();
        let kept: Vec<Application> = records
            .iter()
            .filter(|a| !(a.status.is_closed() && a.updated_at < cutoff))
            .cloned()
            .collect();
        let purged = before - kept.len();
        if purged > 0 {
            self.store.save(&kept)?;
            *records = kept;
        }
        Ok(purged as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn app(id: &str, user: &str, status: ApplicationStatus, age_days: i64) -> Application {
        Application {
            id: id.to_string(),
            user_id: user.to_string(),
            company: format!("Company {id}"),
            position: "Engineer".to_string(),
            status,
            applied_at: now() - Duration::days(age_days + 1),
            updated_at: now() - Duration::days(age_days),
        }
    }

    fn now() -> DateTime<Utc> {
        "2024-05-20T12:00:00Z".parse().unwrap()
    }

    fn seeded(dir: &tempfile::TempDir, records: Vec<Application>) -> JsonFileData {
        let path = dir.path().join("applications.json");
        JsonFileStore::<Vec<Application>>::new(&path)
            .save(&records)
            .unwrap();
        JsonFileData::open(path).unwrap()
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let data = JsonFileData::open(dir.path().join("nope.json")).unwrap();
        assert!(data.is_empty());
        assert_eq!(data.purge_older_than(now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_filters_by_user_age_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let data = seeded(
            &dir,
            vec![
                app("a", "u1", ApplicationStatus::Applied, 10),
                app("b", "u1", ApplicationStatus::Applied, 2),
                app("c", "u1", ApplicationStatus::Offer, 30),
                app("d", "u2", ApplicationStatus::Interview, 30),
                app("e", "u1", ApplicationStatus::Interview, 20),
            ],
        );
        let stale = data
            .stale_applications(
                "u1",
                now() - Duration::days(7),
                &[ApplicationStatus::Applied, ApplicationStatus::Interview],
            )
            .await
            .unwrap();
        let ids: Vec<&str> = stale.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["e", "a"]);
    }

    #[tokio::test]
    async fn digest_counts_recent_activity() {
        let dir = tempfile::tempdir().unwrap();
        let data = seeded(
            &dir,
            vec![
                app("a", "u1", ApplicationStatus::Applied, 1),
                app("b", "u1", ApplicationStatus::Rejected, 3),
                app("c", "u1", ApplicationStatus::Interview, 40),
                app("d", "u2", ApplicationStatus::Applied, 1),
            ],
        );
        let digest = data.digest("u1", now() - Duration::days(7)).await.unwrap();
        assert_eq!(digest.submitted, 2);
        assert_eq!(digest.status_changes.get(&ApplicationStatus::Rejected), Some(&1));
        assert_eq!(digest.open, 2);
    }

    #[tokio::test]
    async fn purge_removes_only_old_closed_records_and_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = seeded(
            &dir,
            vec![
                app("old-rejected", "u1", ApplicationStatus::Rejected, 120),
                app("old-applied", "u1", ApplicationStatus::Applied, 120),
                app("new-withdrawn", "u1", ApplicationStatus::Withdrawn, 10),
            ],
        );
        let purged = data.purge_older_than(now() - Duration::days(90)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(data.len(), 2);

        let reopened = JsonFileData::open(dir.path().join("applications.json")).unwrap();
        assert_eq!(reopened.len(), 2);
    }
}
