use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::models::{
    DashboardFilters, DashboardResult, GroupType, SortField, SortOrder, StudentCommitStats,
    MAX_WINDOW_DAYS,
};
use crate::store::Store;

const DEFAULT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Default)]
pub struct DashboardParams {
    pub group: Option<String>,
    pub days: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub search: Option<String>,
    pub min_commits: Option<i64>,
    pub max_commits: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardQuery {
    pub class_id: Uuid,
    pub group: GroupType,
    pub window_days: i64,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub filters: DashboardFilters,
}

impl DashboardQuery {
    pub fn resolve(class_id: Uuid, params: DashboardParams) -> Self {
        let group = params
            .group
            .as_deref()
            .and_then(GroupType::parse_loose)
            .unwrap_or(GroupType::CourseWork);

        let window_days = params
            .days
            .filter(|d| *d > 0)
            .map(|d| d.min(MAX_WINDOW_DAYS))
            .unwrap_or(DEFAULT_WINDOW_DAYS);

        let sort_by = match params.sort_by.as_deref().map(str::trim) {
            Some("name") => SortField::Name,
            Some("rollNumber") => SortField::RollNumber,
            _ => SortField::TotalCommits,
        };
        let sort_order = match params.sort_order.as_deref().map(str::trim) {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        };

        let search = params
            .search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let mut min_commits = params.min_commits.map(|v| v.max(0));
        let mut max_commits = params.max_commits.map(|v| v.max(0));
        if let (Some(min), Some(max)) = (min_commits, max_commits) {
            if min > max {
                min_commits = Some(max);
                max_commits = Some(min);
            }
        }

        Self {
            class_id,
            group,
            window_days,
            sort_by,
            sort_order,
            filters: DashboardFilters {
                search,
                min_commits,
                max_commits,
            },
        }
    }
}

pub fn apply_filters(
    rows: Vec<StudentCommitStats>,
    filters: &DashboardFilters,
) -> Vec<StudentCommitStats> {
    rows.into_iter()
        .filter(|row| match &filters.search {
            Some(needle) => {
                row.name.to_lowercase().contains(needle)
                    || row.roll_number.to_lowercase().contains(needle)
            }
            None => true,
        })
        .filter(|row| filters.min_commits.map_or(true, |min| row.total_commits >= min))
        .filter(|row| filters.max_commits.map_or(true, |max| row.total_commits <= max))
        .collect()
}

fn compare(a: &StudentCommitStats, b: &StudentCommitStats, field: SortField) -> Ordering {
    match field {
        SortField::TotalCommits => a.total_commits.cmp(&b.total_commits),
        SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortField::RollNumber => a
            .roll_number
            .to_lowercase()
            .cmp(&b.roll_number.to_lowercase()),
    }
}

/// Stable: rows with equal keys keep their input order in both directions.
pub fn sort_rows(rows: &mut [StudentCommitStats], field: SortField, order: SortOrder) {
    match order {
        SortOrder::Asc => rows.sort_by(|a, b| compare(a, b, field)),
        SortOrder::Desc => rows.sort_by(|a, b| compare(b, a, field)),
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub async fn compute_dashboard(store: &dyn Store, query: &DashboardQuery) -> Result<DashboardResult> {
    compute_dashboard_at(store, query, Utc::now()).await
}

pub async fn compute_dashboard_at(
    store: &dyn Store,
    query: &DashboardQuery,
    now: DateTime<Utc>,
) -> Result<DashboardResult> {
    store
        .find_class(query.class_id)
        .await?
        .ok_or(TrackerError::ClassNotFound(query.class_id))?;

    let until = now;
    let since = Duration::try_days(query.window_days)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| {
            TrackerError::validation(format!(
                "A window of {} days is out of range.",
                query.window_days
            ))
        })?;

    let mut result = DashboardResult {
        class_id: query.class_id,
        group_type: query.group,
        since,
        until,
        window_days: query.window_days,
        student_count: 0,
        total_commits: 0,
        average_commits: 0.0,
        sort_by: query.sort_by,
        sort_order: query.sort_order,
        students: Vec::new(),
        filters: query.filters.clone(),
    };

    let students = store.list_students(query.class_id, Some(query.group)).await?;
    if students.is_empty() {
        return Ok(result);
    }

    let ids: Vec<Uuid> = students.iter().map(|s| s.id).collect();
    let counts = store.count_commits_by_student(&ids, since, until).await?;

    let rows = students
        .into_iter()
        .map(|s| StudentCommitStats {
            total_commits: counts.get(&s.id).copied().unwrap_or(0),
            student_id: s.id,
            name: s.name,
            roll_number: s.roll_number,
            repo_url: s.repo_url,
            group_type: s.group_type,
        })
        .collect();

    let mut rows = apply_filters(rows, &query.filters);
    sort_rows(&mut rows, query.sort_by, query.sort_order);

    let total: i64 = rows.iter().map(|r| r.total_commits).sum();
    result.student_count = rows.len();
    result.total_commits = total;
    result.average_commits = if rows.is_empty() {
        0.0
    } else {
        round2(total as f64 / rows.len() as f64)
    };
    result.students = rows;

    Ok(result)
}
