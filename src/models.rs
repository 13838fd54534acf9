use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest commit window, in days, accepted anywhere a window is given.
pub const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupType {
    CourseWork,
    PersonalProjects,
}

impl GroupType {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupType::CourseWork => "courseWork",
            GroupType::PersonalProjects => "personalProjects",
        }
    }

    pub fn parse_loose(value: &str) -> Option<GroupType> {
        match value.trim().to_lowercase().as_str() {
            "coursework" | "course work" | "course-work" | "course_work" => {
                Some(GroupType::CourseWork)
            }
            "personalprojects" | "personal projects" | "personal-projects"
            | "personal_projects" => Some(GroupType::PersonalProjects),
            _ => None,
        }
    }
}

impl std::fmt::Display for GroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub students_uploaded: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: Uuid,
    pub class_id: Uuid,
    pub name: String,
    pub roll_number: String,
    pub repo_url: String,
    pub group_type: GroupType,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub name: String,
    pub roll_number: String,
    pub repo_url: String,
    pub group_type: GroupType,
}

#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub roll_number: Option<String>,
    pub repo_url: Option<String>,
    pub group_type: Option<GroupType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedCommit {
    pub hash: String,
    pub message: Option<String>,
    pub source_url: Option<String>,
    pub author_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSyncError {
    pub student_id: Uuid,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub processed_students: usize,
    pub commits_upserted: u64,
    pub student_errors: Vec<StudentSyncError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCommitStats {
    pub student_id: Uuid,
    pub name: String,
    pub roll_number: String,
    pub repo_url: String,
    pub group_type: GroupType,
    pub total_commits: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    TotalCommits,
    Name,
    RollNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardFilters {
    pub search: Option<String>,
    pub min_commits: Option<i64>,
    pub max_commits: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResult {
    pub class_id: Uuid,
    pub group_type: GroupType,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub window_days: i64,
    pub student_count: usize,
    pub total_commits: i64,
    pub average_commits: f64,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub students: Vec<StudentCommitStats>,
    pub filters: DashboardFilters,
}
