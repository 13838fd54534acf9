use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ClassRecord, FetchedCommit, GroupType, NewStudent, StudentPatch, StudentRecord, UpsertCounts,
};

#[cfg(test)]
pub mod memory;
pub mod postgres;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Transactional,
    PerStatement,
}

impl WriteMode {
    pub fn for_store(store: &dyn Store) -> Self {
        if store.supports_transactions() {
            WriteMode::Transactional
        } else {
            WriteMode::PerStatement
        }
    }
}

pub fn roster_key(value: &str) -> String {
    value.trim().to_lowercase()
}

#[async_trait]
pub trait Store: Send + Sync {
    fn supports_transactions(&self) -> bool;

    async fn create_class(&self, name: &str, description: Option<&str>) -> Result<ClassRecord>;
    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassRecord>>;
    async fn list_classes(&self) -> Result<Vec<ClassRecord>>;
    async fn update_class(
        &self,
        class_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<ClassRecord>>;

    /// Ordered by creation time.
    async fn list_students(
        &self,
        class_id: Uuid,
        group: Option<GroupType>,
    ) -> Result<Vec<StudentRecord>>;
    async fn add_student(&self, class_id: Uuid, student: &NewStudent) -> Result<StudentRecord>;
    async fn update_student(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        patch: &StudentPatch,
    ) -> Result<Option<StudentRecord>>;
    /// Removes the student and its commits; `None` if no such student.
    async fn delete_student(&self, class_id: Uuid, student_id: Uuid) -> Result<Option<u64>>;
    /// Inserts roster rows and flags the class as uploaded.
    async fn insert_roster(
        &self,
        class_id: Uuid,
        students: &[NewStudent],
        mode: WriteMode,
    ) -> Result<usize>;
    async fn mark_synced(&self, student_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Upsert keyed by `(student, hash)`. Rows whose metadata already
    /// matches count as neither inserted nor updated.
    async fn upsert_commits(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        commits: &[FetchedCommit],
        mode: WriteMode,
    ) -> Result<UpsertCounts>;
    /// Commits per student with `since <= author_date <= until`, in one
    /// grouped query. Students without commits are absent from the map.
    async fn count_commits_by_student(
        &self,
        student_ids: &[Uuid],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<HashMap<Uuid, i64>>;
}
