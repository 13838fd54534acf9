use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::models::{ClassRecord, GroupType, NewStudent, StudentPatch, StudentRecord};
use crate::store::{roster_key, Store, WriteMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub inserted_count: usize,
    pub skipped_existing: usize,
}

fn required(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(TrackerError::validation(format!("{field} is required.")))
    } else {
        Ok(trimmed.to_string())
    }
}

fn optional_trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn parse_group_strict(value: &str) -> Result<GroupType> {
    GroupType::parse_loose(value).ok_or_else(|| {
        TrackerError::validation("groupType must be courseWork or personalProjects.")
    })
}

pub struct RosterService {
    store: Arc<dyn Store>,
    write_mode: WriteMode,
}

impl RosterService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let write_mode = WriteMode::for_store(store.as_ref());
        Self { store, write_mode }
    }

    async fn require_class(&self, class_id: Uuid) -> Result<ClassRecord> {
        self.store
            .find_class(class_id)
            .await?
            .ok_or(TrackerError::ClassNotFound(class_id))
    }

    pub async fn create_class(&self, name: &str, description: Option<&str>) -> Result<ClassRecord> {
        let name = required(name, "Class name")?;
        let description = optional_trimmed(description);
        self.store.create_class(&name, description.as_deref()).await
    }

    pub async fn list_classes(&self) -> Result<Vec<ClassRecord>> {
        self.store.list_classes().await
    }

    pub async fn show_class(
        &self,
        class_id: Uuid,
        include_students: bool,
    ) -> Result<(ClassRecord, Vec<StudentRecord>)> {
        let class = self.require_class(class_id).await?;
        let students = if include_students {
            self.store.list_students(class_id, None).await?
        } else {
            Vec::new()
        };
        Ok((class, students))
    }

    pub async fn update_class(
        &self,
        class_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<ClassRecord> {
        let name = optional_trimmed(name);
        let description = optional_trimmed(description);
        self.store
            .update_class(class_id, name.as_deref(), description.as_deref())
            .await?
            .ok_or(TrackerError::ClassNotFound(class_id))
    }

    pub async fn list_students(&self, class_id: Uuid) -> Result<Vec<StudentRecord>> {
        self.require_class(class_id).await?;
        self.store.list_students(class_id, None).await
    }

    pub async fn add_student(
        &self,
        class_id: Uuid,
        name: &str,
        roll_number: &str,
        repo_url: &str,
        group: &str,
    ) -> Result<StudentRecord> {
        let student = NewStudent {
            name: required(name, "name")?,
            roll_number: required(roll_number, "rollNumber")?,
            repo_url: required(repo_url, "repoUrl")?,
            group_type: parse_group_strict(group)?,
        };
        self.require_class(class_id).await?;
        self.store.add_student(class_id, &student).await
    }

    pub async fn update_student(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        patch: StudentPatch,
    ) -> Result<StudentRecord> {
        let patch = StudentPatch {
            name: optional_trimmed(patch.name.as_deref()),
            roll_number: optional_trimmed(patch.roll_number.as_deref()),
            repo_url: optional_trimmed(patch.repo_url.as_deref()),
            group_type: patch.group_type,
        };
        self.store
            .update_student(class_id, student_id, &patch)
            .await?
            .ok_or(TrackerError::StudentNotFound(student_id))
    }

    pub async fn remove_student(&self, class_id: Uuid, student_id: Uuid) -> Result<u64> {
        self.store
            .delete_student(class_id, student_id)
            .await?
            .ok_or(TrackerError::StudentNotFound(student_id))
    }

    pub async fn import_roster(
        &self,
        class_id: Uuid,
        rows: Vec<NewStudent>,
    ) -> Result<ImportOutcome> {
        self.require_class(class_id).await?;

        let mut rolls = HashSet::new();
        let mut repos = HashSet::new();
        for row in &rows {
            if !rolls.insert(roster_key(&row.roll_number)) || !repos.insert(roster_key(&row.repo_url))
            {
                return Err(TrackerError::DuplicateRosterEntry(
                    "Duplicate roll numbers or repo URLs found in the spreadsheet.".to_string(),
                ));
            }
        }

        let existing = self.store.list_students(class_id, None).await?;
        let existing_rolls: HashSet<String> =
            existing.iter().map(|s| roster_key(&s.roll_number)).collect();
        let existing_repos: HashSet<String> =
            existing.iter().map(|s| roster_key(&s.repo_url)).collect();

        let total = rows.len();
        let fresh: Vec<NewStudent> = rows
            .into_iter()
            .filter(|row| {
                !existing_rolls.contains(&roster_key(&row.roll_number))
                    && !existing_repos.contains(&roster_key(&row.repo_url))
            })
            .collect();

        let inserted_count = self
            .store
            .insert_roster(class_id, &fresh, self.write_mode)
            .await?;
        tracing::info!(%class_id, inserted_count, skipped = total - fresh.len(), "roster imported");

        Ok(ImportOutcome {
            inserted_count,
            skipped_existing: total - fresh.len(),
        })
    }
}
