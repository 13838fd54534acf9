use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{Store, WriteMode};
use crate::error::{Result, TrackerError};
use crate::models::{
    ClassRecord, FetchedCommit, GroupType, NewStudent, StudentPatch, StudentRecord, UpsertCounts,
};

const UNIQUE_VIOLATION: &str = "23505";

const STUDENT_COLUMNS: &str =
    "id, class_id, name, roll_number, repo_url, group_type, last_synced_at, created_at";

const INSERT_STUDENT: &str = r#"
    INSERT INTO students (id, class_id, name, roll_number, repo_url, group_type)
    VALUES ($1, $2, $3, $4, $5, $6)
    RETURNING id, class_id, name, roll_number, repo_url, group_type, last_synced_at, created_at
"#;

// xmax is zero only for freshly inserted tuples. The WHERE clause leaves
// identical rows untouched so they return nothing.
const UPSERT_COMMIT: &str = r#"
    INSERT INTO commits (id, student_id, class_id, hash, message, source_url, author_date)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (student_id, hash) DO UPDATE
    SET class_id = EXCLUDED.class_id,
        message = EXCLUDED.message,
        source_url = EXCLUDED.source_url,
        author_date = EXCLUDED.author_date,
        updated_at = NOW()
    WHERE commits.message IS DISTINCT FROM EXCLUDED.message
       OR commits.source_url IS DISTINCT FROM EXCLUDED.source_url
       OR commits.author_date IS DISTINCT FROM EXCLUDED.author_date
    RETURNING (xmax = 0) AS inserted
"#;

const DELETE_COMMITS: &str = r#"
    DELETE FROM commits
    WHERE student_id = $1
      AND EXISTS (SELECT 1 FROM students WHERE id = $1 AND class_id = $2)
"#;

const DELETE_STUDENT: &str = "DELETE FROM students WHERE id = $1 AND class_id = $2";

pub struct PgStore {
    pool: PgPool,
    transactions: bool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            transactions: true,
        }
    }

    pub fn with_transactions(mut self, enabled: bool) -> Self {
        self.transactions = enabled;
        self
    }

    pub async fn init_db(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn roster_conflict(err: sqlx::Error, student: &str) -> TrackerError {
    if is_unique_violation(&err) {
        TrackerError::DuplicateRosterEntry(format!(
            "roll number or repo URL of {student} already exists in this class"
        ))
    } else {
        TrackerError::Database(err)
    }
}

fn class_from_row(row: &PgRow) -> ClassRecord {
    ClassRecord {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        students_uploaded: row.get("students_uploaded"),
        created_at: row.get("created_at"),
    }
}

fn student_from_row(row: &PgRow) -> Result<StudentRecord> {
    let raw_group: String = row.get("group_type");
    let group_type = match raw_group.as_str() {
        "courseWork" => GroupType::CourseWork,
        "personalProjects" => GroupType::PersonalProjects,
        other => {
            return Err(TrackerError::Database(sqlx::Error::Decode(
                format!("unknown group type {other:?}").into(),
            )))
        }
    };

    Ok(StudentRecord {
        id: row.get("id"),
        class_id: row.get("class_id"),
        name: row.get("name"),
        roll_number: row.get("roll_number"),
        repo_url: row.get("repo_url"),
        group_type,
        last_synced_at: row.get("last_synced_at"),
        created_at: row.get("created_at"),
    })
}

async fn upsert_one<'e, E>(
    executor: E,
    class_id: Uuid,
    student_id: Uuid,
    commit: &FetchedCommit,
    counts: &mut UpsertCounts,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(UPSERT_COMMIT)
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(class_id)
        .bind(&commit.hash)
        .bind(&commit.message)
        .bind(&commit.source_url)
        .bind(commit.author_date)
        .fetch_optional(executor)
        .await?;

    match row.map(|r| r.get::<bool, _>("inserted")) {
        Some(true) => counts.inserted += 1,
        Some(false) => counts.updated += 1,
        None => {}
    }
    Ok(())
}

async fn insert_roster_rows(
    tx: &mut Transaction<'_, Postgres>,
    class_id: Uuid,
    students: &[NewStudent],
) -> Result<usize> {
    for student in students {
        sqlx::query(INSERT_STUDENT)
            .bind(Uuid::new_v4())
            .bind(class_id)
            .bind(&student.name)
            .bind(&student.roll_number)
            .bind(&student.repo_url)
            .bind(student.group_type.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| roster_conflict(e, &student.roll_number))?;
    }
    Ok(students.len())
}

#[async_trait]
impl Store for PgStore {
    fn supports_transactions(&self) -> bool {
        self.transactions
    }

    async fn create_class(&self, name: &str, description: Option<&str>) -> Result<ClassRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO classes (id, name, description)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, students_uploaded, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                TrackerError::ClassExists(name.to_string())
            } else {
                TrackerError::Database(e)
            }
        })?;

        Ok(class_from_row(&row))
    }

    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassRecord>> {
        let row = sqlx::query(
            "SELECT id, name, description, students_uploaded, created_at FROM classes WHERE id = $1",
        )
        .bind(class_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(class_from_row))
    }

    async fn list_classes(&self) -> Result<Vec<ClassRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, description, students_uploaded, created_at FROM classes ORDER BY seq DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(class_from_row).collect())
    }

    async fn update_class(
        &self,
        class_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<ClassRecord>> {
        let row = sqlx::query(
            r#"
            UPDATE classes
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description, students_uploaded, created_at
            "#,
        )
        .bind(class_id)
        .bind(name)
        .bind(description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                TrackerError::ClassExists(name.unwrap_or_default().to_string())
            } else {
                TrackerError::Database(e)
            }
        })?;

        Ok(row.as_ref().map(class_from_row))
    }

    async fn list_students(
        &self,
        class_id: Uuid,
        group: Option<GroupType>,
    ) -> Result<Vec<StudentRecord>> {
        let mut query = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE class_id = $1");
        if group.is_some() {
            query.push_str(" AND group_type = $2");
        }
        query.push_str(" ORDER BY seq");

        let mut rows = sqlx::query(&query).bind(class_id);
        if let Some(value) = group {
            rows = rows.bind(value.as_str());
        }

        let records = rows.fetch_all(&self.pool).await?;
        records.iter().map(student_from_row).collect()
    }

    async fn add_student(&self, class_id: Uuid, student: &NewStudent) -> Result<StudentRecord> {
        let row = sqlx::query(INSERT_STUDENT)
            .bind(Uuid::new_v4())
            .bind(class_id)
            .bind(&student.name)
            .bind(&student.roll_number)
            .bind(&student.repo_url)
            .bind(student.group_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| roster_conflict(e, &student.roll_number))?;

        student_from_row(&row)
    }

    async fn update_student(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        patch: &StudentPatch,
    ) -> Result<Option<StudentRecord>> {
        let query = format!(
            r#"
            UPDATE students
            SET name = COALESCE($3, name),
                roll_number = COALESCE($4, roll_number),
                repo_url = COALESCE($5, repo_url),
                group_type = COALESCE($6, group_type),
                updated_at = NOW()
            WHERE id = $1 AND class_id = $2
            RETURNING {STUDENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(student_id)
            .bind(class_id)
            .bind(patch.name.as_deref())
            .bind(patch.roll_number.as_deref())
            .bind(patch.repo_url.as_deref())
            .bind(patch.group_type.map(GroupType::as_str))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| roster_conflict(e, &student_id.to_string()))?;

        row.as_ref().map(student_from_row).transpose()
    }

    async fn delete_student(&self, class_id: Uuid, student_id: Uuid) -> Result<Option<u64>> {
        if !self.transactions {
            let removed = sqlx::query(DELETE_COMMITS)
                .bind(student_id)
                .bind(class_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
            let deleted = sqlx::query(DELETE_STUDENT)
                .bind(student_id)
                .bind(class_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
            return Ok((deleted > 0).then_some(removed));
        }

        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(DELETE_COMMITS)
            .bind(student_id)
            .bind(class_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let deleted = sqlx::query(DELETE_STUDENT)
            .bind(student_id)
            .bind(class_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(removed))
    }

    async fn insert_roster(
        &self,
        class_id: Uuid,
        students: &[NewStudent],
        mode: WriteMode,
    ) -> Result<usize> {
        const MARK_UPLOADED: &str =
            "UPDATE classes SET students_uploaded = TRUE, updated_at = NOW() WHERE id = $1";

        match mode {
            WriteMode::Transactional => {
                let mut tx = self.pool.begin().await?;
                let inserted = insert_roster_rows(&mut tx, class_id, students).await?;
                sqlx::query(MARK_UPLOADED)
                    .bind(class_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(inserted)
            }
            WriteMode::PerStatement => {
                for student in students {
                    self.add_student(class_id, student).await?;
                }
                sqlx::query(MARK_UPLOADED)
                    .bind(class_id)
                    .execute(&self.pool)
                    .await?;
                Ok(students.len())
            }
        }
    }

    async fn mark_synced(&self, student_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE students SET last_synced_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(student_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_commits(
        &self,
        class_id: Uuid,
        student_id: Uuid,
        commits: &[FetchedCommit],
        mode: WriteMode,
    ) -> Result<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        if commits.is_empty() {
            return Ok(counts);
        }

        match mode {
            WriteMode::Transactional => {
                let mut tx = self.pool.begin().await?;
                for commit in commits {
                    upsert_one(&mut *tx, class_id, student_id, commit, &mut counts).await?;
                }
                tx.commit().await?;
            }
            WriteMode::PerStatement => {
                for commit in commits {
                    upsert_one(&self.pool, class_id, student_id, commit, &mut counts).await?;
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
        let rows = sqlx::query(
            r#"
            SELECT student_id, COUNT(*) AS total_commits
            FROM commits
            WHERE student_id = ANY($1)
              AND author_date >= $2
              AND author_date <= $3
            GROUP BY student_id
            "#,
        )
        .bind(student_ids)
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("student_id"), row.get("total_commits")))
            .collect())
    }
}
