use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{roster_key, Store, WriteMode};
use crate::error::{Result, TrackerError};
use crate::models::{
    ClassRecord, FetchedCommit, GroupType, NewStudent, StudentPatch, StudentRecord, UpsertCounts,
};

#[derive(Debug, Clone)]
pub struct StoredCommit {
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub hash: String,
    pub message: Option<String>,
    pub source_url: Option<String>,
    pub author_date: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    classes: Vec<ClassRecord>,
    students: Vec<StudentRecord>,
    commits: Vec<StoredCommit>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    ticks: AtomicUsize,
    pub commit_count_queries: AtomicUsize,
    failing_upserts: Mutex<Vec<Uuid>>,
}

impl MemoryStore {
    fn next_timestamp(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) as i64;
        DateTime::from_timestamp(1_700_000_000 + tick, 0).unwrap_or_default()
    }

    pub fn commits(&self) -> Vec<StoredCommit> {
        self.tables.lock().unwrap().commits.clone()
    }

    pub fn student(&self, student_id: Uuid) -> Option<StudentRecord> {
        let tables = self.tables.lock().unwrap();
        tables.students.iter().find(|s| s.id == student_id).cloned()
    }

    pub fn fail_upserts_for(&self, student_id: Uuid) {
        self.failing_upserts.lock().unwrap().push(student_id);
    }

    pub fn insert_commit(&self, commit: StoredCommit) {
        self.tables.lock().unwrap().commits.push(commit);
    }

    fn conflicts(
        students: &[StudentRecord],
        class_id: Uuid,
        skip: Option<Uuid>,
        roll: &str,
        repo: &str,
    ) -> bool {
        let (roll, repo) = (roster_key(roll), roster_key(repo));
        students.iter().any(|s| {
            s.class_id == class_id
                && Some(s.id) != skip
                && (roster_key(&s.roll_number) == roll || roster_key(&s.repo_url) == repo)
        })
    }

    fn insert_student(
        &self,
        tables: &mut Tables,
        class_id: Uuid,
        student: &NewStudent,
    ) -> Result<StudentRecord> {
        if Self::conflicts(
            &tables.students,
            class_id,
            None,
            &student.roll_number,
            &student.repo_url,
        ) {
            return Err(TrackerError::DuplicateRosterEntry(format!(
                "roll number or repo URL of {} already exists in this class",
                student.roll_number
            )));
        }
        let record = StudentRecord {
            id: Uuid::new_v4(),
            class_id,
            name: student.name.clone(),
            roll_number: student.roll_number.clone(),
            repo_url: student.repo_url.clone(),
            group_type: student.group_type,
            last_synced_at: None,
            created_at: self.next_timestamp(),
        };
        tables.students.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn create_class(&self, name: &str, description: Option<&str>) -> Result<ClassRecord> {
        let mut tables = self.tables.lock().unwrap();
        if tables.classes.iter().any(|c| c.name == name) {
            return Err(TrackerError::ClassExists(name.to_string()));
        }
        let record = ClassRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            students_uploaded: false,
            created_at: self.next_timestamp(),
        };
        tables.classes.push(record.clone());
        Ok(record)
    }

    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.classes.iter().find(|c| c.id == class_id).cloned())
    }

    async fn list_classes(&self) -> Result<Vec<ClassRecord>> {
        let tables = self.tables.lock().unwrap();
        let mut classes = tables.classes.clone();
        classes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(classes)
    }

    async fn update_class(
        &self,
        class_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<ClassRecord>> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(name) = name {
            if tables.classes.iter().any(|c| c.name == name && c.id != class_id) {
                return Err(TrackerError::ClassExists(name.to_string()));
            }
        }
        let Some(class) = tables.classes.iter_mut().find(|c| c.id == class_id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            class.name = name.to_string();
        }
        if let Some(description) = description {
            class.description = Some(description.to_string());
        }
        Ok(Some(class.clone()))
    }

    async fn list_students(
        &self,
        class_id: Uuid,
        group: Option<GroupType>,
    ) -> Result<Vec<StudentRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .students
            .iter()
            .filter(|s| s.class_id == class_id && group.map_or(true, |g| s.group_type == g))
            .cloned()
            .collect())
    }

    async fn add_student(&self, class_id: Uuid, student: &NewStudent) -> Result<StudentRecord> {
        let mut tables = self.tables.lock().unwrap();
        self.insert_student(&mut tables, class_id, student)
    }

    async fn update_student(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        patch: &StudentPatch,
    ) -> Result<Option<StudentRecord>> {
        let mut tables = self.tables.lock().unwrap();
        let Some(current) = tables
            .students
            .iter()
            .find(|s| s.id == student_id && s.class_id == class_id)
            .cloned()
        else {
            return Ok(None);
        };

        let roll = patch.roll_number.as_deref().unwrap_or(&current.roll_number);
        let repo = patch.repo_url.as_deref().unwrap_or(&current.repo_url);
        if Self::conflicts(&tables.students, class_id, Some(student_id), roll, repo) {
            return Err(TrackerError::DuplicateRosterEntry(format!(
                "roll number or repo URL of {roll} already exists in this class"
            )));
        }

        let Some(student) = tables.students.iter_mut().find(|s| s.id == student_id) else {
            return Ok(None);
        };
        if let Some(name) = &patch.name {
            student.name = name.clone();
        }
        if let Some(roll) = &patch.roll_number {
            student.roll_number = roll.clone();
        }
        if let Some(repo) = &patch.repo_url {
            student.repo_url = repo.clone();
        }
        if let Some(group) = patch.group_type {
            student.group_type = group;
        }
        Ok(Some(student.clone()))
    }

    async fn delete_student(&self, class_id: Uuid, student_id: Uuid) -> Result<Option<u64>> {
        let mut tables = self.tables.lock().unwrap();
        let before = tables.students.len();
        tables
            .students
            .retain(|s| !(s.id == student_id && s.class_id == class_id));
        if tables.students.len() == before {
            return Ok(None);
        }
        let commits_before = tables.commits.len();
        tables.commits.retain(|c| c.student_id != student_id);
        Ok(Some((commits_before - tables.commits.len()) as u64))
    }

    async fn insert_roster(
        &self,
        class_id: Uuid,
        students: &[NewStudent],
        _mode: WriteMode,
    ) -> Result<usize> {
        let mut tables = self.tables.lock().unwrap();
        for student in students {
            self.insert_student(&mut tables, class_id, student)?;
        }
        if let Some(class) = tables.classes.iter_mut().find(|c| c.id == class_id) {
            class.students_uploaded = true;
        }
        Ok(students.len())
    }

    async fn mark_synced(&self, student_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(student) = tables.students.iter_mut().find(|s| s.id == student_id) {
            student.last_synced_at = Some(at);
        }
        Ok(())
    }

    async fn upsert_commits(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        commits: &[FetchedCommit],
        _mode: WriteMode,
    ) -> Result<UpsertCounts> {
        if self.failing_upserts.lock().unwrap().contains(&student_id) {
            return Err(TrackerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }

        let mut tables = self.tables.lock().unwrap();
        let mut counts = UpsertCounts::default();
        for commit in commits {
            let existing = tables
                .commits
                .iter_mut()
                .find(|c| c.student_id == student_id && c.hash == commit.hash);
            match existing {
                Some(stored) => {
                    if stored.message != commit.message
                        || stored.source_url != commit.source_url
                        || stored.author_date != commit.author_date
                    {
                        stored.message = commit.message.clone();
                        stored.source_url = commit.source_url.clone();
                        stored.author_date = commit.author_date;
                        stored.class_id = class_id;
                        counts.updated += 1;
                    }
                }
                None => {
                    tables.commits.push(StoredCommit {
                        student_id,
                        class_id,
                        hash: commit.hash.clone(),
                        message: commit.message.clone(),
                        source_url: commit.source_url.clone(),
                        author_date: commit.author_date,
                    });
                    counts.inserted += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn count_commits_by_student(
        &self,
        student_ids: &[Uuid],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<HashMap<Uuid, i64>> {
        self.commit_count_queries.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock().unwrap();
        let mut counts = HashMap::new();
        for commit in &tables.commits {
            if student_ids.contains(&commit.student_id)
                && commit.author_date >= since
                && commit.author_date <= until
            {
                *counts.entry(commit.student_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
