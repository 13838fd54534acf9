use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::github::{CommitFetcher, CommitWindow};
use crate::models::{StudentRecord, StudentSyncError, SyncSummary, MAX_WINDOW_DAYS};
use crate::store::{Store, WriteMode};

pub fn window_ending_at(now: DateTime<Utc>, window_days: i64) -> CommitWindow {
    CommitWindow {
        since: Some(now - Duration::days(window_days.clamp(0, MAX_WINDOW_DAYS))),
        until: Some(now),
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn Store>,
    fetcher: CommitFetcher,
    write_mode: WriteMode,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, fetcher: CommitFetcher) -> Self {
        let write_mode = WriteMode::for_store(store.as_ref());
        Self {
            store,
            fetcher,
            write_mode,
        }
    }

    pub async fn synchronize(&self, class_id: Uuid, window_days: i64) -> Result<SyncSummary> {
        self.synchronize_at(class_id, window_days, Utc::now()).await
    }

    pub async fn synchronize_at(
        &self,
        class_id: Uuid,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<SyncSummary> {
        let class = self
            .store
            .find_class(class_id)
            .await?
            .ok_or(TrackerError::ClassNotFound(class_id))?;

        let students = self.store.list_students(class_id, None).await?;
        if students.is_empty() {
            return Err(TrackerError::NoStudentsFound(class_id));
        }

        let window = window_ending_at(now, window_days);
        tracing::info!(
            class = %class.name,
            window_days,
            students = students.len(),
            "starting commit sync"
        );

        let mut summary = SyncSummary {
            processed_students: students.len(),
            ..SyncSummary::default()
        };

        for student in &students {
            match self.sync_student(class.id, student, &window, now).await {
                Ok(upserted) => {
                    tracing::debug!(student = %student.name, upserted, "student synced");
                    summary.commits_upserted += upserted;
                }
                Err(err) => {
                    tracing::warn!(
                        student = %student.name,
                        kind = ?err.kind(),
                        error = %err,
                        "student sync failed"
                    );
                    summary.student_errors.push(StudentSyncError {
                        student_id: student.id,
                        name: student.name.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            class = %class.name,
            commits_upserted = summary.commits_upserted,
            failures = summary.student_errors.len(),
            "commit sync finished"
        );
        Ok(summary)
    }

    async fn sync_student(
        &self,
        class_id: Uuid,
        student: &StudentRecord,
        window: &CommitWindow,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let commits = self.fetcher.fetch_commits(&student.repo_url, window).await?;
        let counts = self
            .store
            .upsert_commits(class_id, student.id, &commits, self.write_mode)
            .await?;
        self.store.mark_synced(student.id, now).await?;
        Ok(counts.total())
    }

    /// One pass over every class. A failing class is logged and skipped.
    pub async fn run_scheduled_tick(
        &self,
        window_days: i64,
    ) -> Result<Vec<(Uuid, Result<SyncSummary>)>> {
        let classes = self.store.list_classes().await?;
        let mut outcomes = Vec::with_capacity(classes.len());

        for class in classes {
            let outcome = self.synchronize(class.id, window_days).await;
            match &outcome {
                Ok(summary) => tracing::info!(
                    class = %class.name,
                    processed = summary.processed_students,
                    upserted = summary.commits_upserted,
                    failures = summary.student_errors.len(),
                    "scheduled sync complete"
                ),
                Err(err) => {
                    tracing::error!(
                        class = %class.name,
                        kind = ?err.kind(),
                        error = %err,
                        "scheduled sync failed"
                    )
                }
            }
            outcomes.push((class.id, outcome));
        }

        Ok(outcomes)
    }

    pub async fn run_scheduler(
        &self,
        interval: StdDuration,
        window_days: i64,
        mut shutdown: watch::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("running scheduled commit sync");
                    if let Err(err) = self.run_scheduled_tick(window_days).await {
                        tracing::error!(error = %err, "could not list classes for scheduled sync");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("scheduler stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::github::tests::{raw, ScriptedSource};
    use crate::github::SourceError;
    use crate::models::{GroupType, NewStudent};
    use crate::store::memory::MemoryStore;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-18T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn student(roll: &str, repo: &str) -> NewStudent {
        NewStudent {
            name: format!("Student {roll}"),
            roll_number: roll.to_string(),
            repo_url: format!("https://github.com/{repo}"),
            group_type: GroupType::CourseWork,
        }
    }

    async fn seeded(rolls: &[(&str, &str)]) -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::default());
        let class = store.create_class("CS101", None).await.unwrap();
        for (roll, repo) in rolls {
            store.add_student(class.id, &student(roll, repo)).await.unwrap();
        }
        (store, class.id)
    }

    fn engine(store: &Arc<MemoryStore>, source: ScriptedSource) -> SyncEngine {
        let fetcher = CommitFetcher::new(Arc::new(source), 100);
        SyncEngine::new(store.clone(), fetcher)
    }

    const DATE: &str = "2026-10-15T09:00:00Z";

    #[tokio::test]
    async fn second_run_with_same_remote_upserts_nothing() {
        let (store, class_id) = seeded(&[("R1", "alice/proj")]).await;
        let source = || {
            ScriptedSource::default().with_pages(
                "alice/proj",
                vec![Ok(vec![raw("a", Some(DATE)), raw("b", Some(DATE))])],
            )
        };

        let first = engine(&store, source())
            .synchronize_at(class_id, 30, now())
            .await
            .unwrap();
        assert_eq!(first.commits_upserted, 2);

        let second = engine(&store, source())
            .synchronize_at(class_id, 30, now())
            .await
            .unwrap();
        assert_eq!(second.commits_upserted, 0);
        assert!(second.student_errors.is_empty());
        assert_eq!(store.commits().len(), 2);
    }

    #[tokio::test]
    async fn changed_metadata_counts_as_update() {
        let (store, class_id) = seeded(&[("R1", "alice/proj")]).await;
        engine(
            &store,
            ScriptedSource::default()
                .with_pages("alice/proj", vec![Ok(vec![raw("a", Some(DATE))])]),
        )
        .synchronize_at(class_id, 30, now())
        .await
        .unwrap();

        let mut amended = raw("a", Some(DATE));
        amended.commit.as_mut().unwrap().message = Some("reworded".to_string());
        let summary = engine(
            &store,
            ScriptedSource::default().with_pages("alice/proj", vec![Ok(vec![amended])]),
        )
        .synchronize_at(class_id, 30, now())
        .await
        .unwrap();

        assert_eq!(summary.commits_upserted, 1);
        let commits = store.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message.as_deref(), Some("reworded"));
        assert_eq!(commits[0].class_id, class_id);
    }

    #[tokio::test]
    async fn one_unreachable_repository_does_not_stop_the_batch() {
        let (store, class_id) =
            seeded(&[("R1", "alice/one"), ("R2", "bob/missing"), ("R3", "carol/three")]).await;
        let source = ScriptedSource::default()
            .with_pages("alice/one", vec![Ok(vec![raw("a1", Some(DATE))])])
            .with_pages(
                "carol/three",
                vec![Ok(vec![raw("c1", Some(DATE)), raw("c2", Some(DATE))])],
            );

        let summary = engine(&store, source)
            .synchronize_at(class_id, 30, now())
            .await
            .unwrap();

        assert_eq!(summary.processed_students, 3);
        assert_eq!(summary.commits_upserted, 3);
        assert_eq!(summary.student_errors.len(), 1);
        assert_eq!(summary.student_errors[0].name, "Student R2");
        assert!(summary.student_errors[0]
            .message
            .contains("https://github.com/bob/missing"));
        assert_eq!(store.commits().len(), 3);
    }

    #[tokio::test]
    async fn failed_student_keeps_previous_sync_timestamp() {
        let (store, class_id) = seeded(&[("R1", "alice/one"), ("R2", "bob/limited")]).await;
        let source = ScriptedSource::default()
            .with_pages("alice/one", vec![Ok(vec![])])
            .with_pages("bob/limited", vec![Err(SourceError::Forbidden(403))]);

        let summary = engine(&store, source)
            .synchronize_at(class_id, 7, now())
            .await
            .unwrap();

        let students = store.list_students(class_id, None).await.unwrap();
        assert_eq!(students[0].last_synced_at, Some(now()));
        assert_eq!(students[1].last_synced_at, None);
        assert!(summary.student_errors[0].message.contains("rate limit"));
    }

    #[tokio::test]
    async fn store_failure_is_recorded_per_student() {
        let (store, class_id) = seeded(&[("R1", "alice/one"), ("R2", "bob/two")]).await;
        let students = store.list_students(class_id, None).await.unwrap();
        store.fail_upserts_for(students[0].id);
        let source = ScriptedSource::default()
            .with_pages("alice/one", vec![Ok(vec![raw("a1", Some(DATE))])])
            .with_pages("bob/two", vec![Ok(vec![raw("b1", Some(DATE))])]);

        let summary = engine(&store, source)
            .synchronize_at(class_id, 30, now())
            .await
            .unwrap();

        assert_eq!(summary.student_errors.len(), 1);
        assert_eq!(summary.student_errors[0].student_id, students[0].id);
        assert_eq!(summary.commits_upserted, 1);
    }

    #[tokio::test]
    async fn invalid_repository_url_is_a_student_error() {
        let store = Arc::new(MemoryStore::default());
        let class = store.create_class("CS102", None).await.unwrap();
        store
            .add_student(
                class.id,
                &NewStudent {
                    name: "Dana".to_string(),
                    roll_number: "R9".to_string(),
                    repo_url: "https://gitlab.com/dana/site".to_string(),
                    group_type: GroupType::PersonalProjects,
                },
            )
            .await
            .unwrap();

        let summary = engine(&store, ScriptedSource::default())
            .synchronize_at(class.id, 30, now())
            .await
            .unwrap();
        assert_eq!(summary.processed_students, 1);
        assert_eq!(summary.student_errors.len(), 1);
    }

    #[tokio::test]
    async fn preconditions_fail_the_whole_run() {
        let store = Arc::new(MemoryStore::default());
        let sync = engine(&store, ScriptedSource::default());

        let missing = sync.synchronize_at(Uuid::new_v4(), 30, now()).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::ClassNotFound);

        let class = store.create_class("Empty", None).await.unwrap();
        let empty = sync.synchronize_at(class.id, 30, now()).await.unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::NoStudentsFound);
    }

    #[test]
    fn window_spans_requested_days() {
        let window = window_ending_at(now(), 7);
        assert_eq!(window.until, Some(now()));
        assert_eq!(window.since, Some(now() - Duration::days(7)));
    }

    #[test]
    fn huge_window_is_capped() {
        let window = window_ending_at(now(), 100_000_000);
        assert_eq!(window.since, Some(now() - Duration::days(MAX_WINDOW_DAYS)));
        let window = window_ending_at(now(), i64::MAX);
        assert_eq!(window.since, Some(now() - Duration::days(MAX_WINDOW_DAYS)));
    }

    #[tokio::test]
    async fn sync_with_huge_window_still_runs() {
        let (store, class_id) = seeded(&[("R1", "alice/proj")]).await;
        let source = ScriptedSource::default()
            .with_pages("alice/proj", vec![Ok(vec![raw("a", Some(DATE))])]);

        let summary = engine(&store, source)
            .synchronize_at(class_id, i64::MAX, now())
            .await
            .unwrap();
        assert_eq!(summary.commits_upserted, 1);
    }

    #[tokio::test]
    async fn scheduled_tick_continues_past_failing_class() {
        let store = Arc::new(MemoryStore::default());
        store.create_class("Empty", None).await.unwrap();
        let class = store.create_class("Busy", None).await.unwrap();
        store
            .add_student(class.id, &student("R1", "alice/proj"))
            .await
            .unwrap();
        let source = ScriptedSource::default()
            .with_pages("alice/proj", vec![Ok(vec![raw("a", Some(DATE))])]);

        let outcomes = engine(&store, source).run_scheduled_tick(30).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        assert_eq!(failed, 1);
        assert_eq!(store.commits().len(), 1);
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::default());
        let sync = engine(&store, ScriptedSource::default());
        let (tx, rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            sync.run_scheduler(StdDuration::from_secs(3600), 30, rx).await;
        });
        tx.send(()).unwrap();
        tokio::time::timeout(StdDuration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
