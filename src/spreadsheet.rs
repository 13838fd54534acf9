use std::io::{Read, Write};

use chrono::SecondsFormat;

use crate::error::{Result, TrackerError};
use crate::models::{DashboardResult, GroupType, NewStudent, StudentRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Name,
    RollNumber,
    RepoUrl,
    GroupType,
}

impl Column {
    const ALL: [Column; 4] = [
        Column::Name,
        Column::RollNumber,
        Column::RepoUrl,
        Column::GroupType,
    ];

    fn label(self) -> &'static str {
        match self {
            Column::Name => "Name",
            Column::RollNumber => "RollNo",
            Column::RepoUrl => "RepoURL",
            Column::GroupType => "GroupType",
        }
    }

    fn from_header(header: &str) -> Option<Column> {
        let key: String = header
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect();
        match key.as_str() {
            "name" | "studentname" | "fullname" => Some(Column::Name),
            "rollno" | "rollnumber" | "roll" => Some(Column::RollNumber),
            "repourl" | "repo" | "repository" | "repositoryurl" | "githuburl" => {
                Some(Column::RepoUrl)
            }
            "grouptype" | "group" | "category" => Some(Column::GroupType),
            _ => None,
        }
    }
}

/// Parses roster rows. Row numbers in errors are spreadsheet rows, so the
/// first data row is row 2.
pub fn parse_roster<R: Read>(input: R) -> Result<Vec<NewStudent>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers = reader.headers()?.clone();
    let mut positions: [Option<usize>; 4] = [None; 4];
    for (idx, header) in headers.iter().enumerate() {
        if let Some(column) = Column::from_header(header) {
            let slot = &mut positions[column as usize];
            if slot.is_none() {
                *slot = Some(idx);
            }
        }
    }

    let missing: Vec<&str> = Column::ALL
        .iter()
        .filter(|c| positions[**c as usize].is_none())
        .map(|c| c.label())
        .collect();
    if !missing.is_empty() {
        return Err(TrackerError::validation(format!(
            "Missing required column(s): {}. Expected headers: Name, RollNo, RepoURL, GroupType",
            missing.join(", ")
        )));
    }

    let mut students = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        let field = |column: Column| {
            positions[column as usize]
                .and_then(|i| record.get(i))
                .unwrap_or("")
                .to_string()
        };

        let name = field(Column::Name);
        let roll_number = field(Column::RollNumber);
        let repo_url = field(Column::RepoUrl);
        let group_type = GroupType::parse_loose(&field(Column::GroupType));

        match group_type {
            Some(group_type) if !name.is_empty() && !roll_number.is_empty() && !repo_url.is_empty() => {
                students.push(NewStudent {
                    name,
                    roll_number,
                    repo_url,
                    group_type,
                });
            }
            _ => {
                return Err(TrackerError::validation(format!(
                    "Invalid data on row {}. Ensure Name, RollNo, RepoURL, GroupType are populated \
                     and group type is either courseWork or personalProjects.",
                    index + 2
                )))
            }
        }
    }

    if students.is_empty() {
        return Err(TrackerError::validation("Roster sheet has no data rows."));
    }
    Ok(students)
}

/// `<name>_students.csv` with anything outside `[A-Za-z0-9_-]` replaced.
pub fn export_file_name(class_name: &str) -> String {
    let safe: String = class_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if safe.is_empty() { "class".to_string() } else { safe };
    format!("{stem}_students.csv")
}

pub fn write_roster<W: Write>(output: W, students: &[StudentRecord]) -> Result<()> {
    if students.is_empty() {
        return Err(TrackerError::validation("No students found to export."));
    }

    let mut sorted: Vec<&StudentRecord> = students.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["Name", "RollNo", "RepoURL", "GroupType", "LastSyncedAt"])?;
    for student in sorted {
        let synced = student
            .last_synced_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        writer.write_record([
            student.name.as_str(),
            student.roll_number.as_str(),
            student.repo_url.as_str(),
            student.group_type.as_str(),
            synced.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_dashboard<W: Write>(output: W, dashboard: &DashboardResult) -> Result<()> {
    if dashboard.student_count == 0 {
        return Err(TrackerError::validation(
            "No commit data available for this selection.",
        ));
    }

    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);
    writer.write_record(["Name", "RollNo", "RepoURL", "GroupType", "TotalCommits"])?;
    for row in &dashboard.students {
        writer.write_record([
            row.name.clone(),
            row.roll_number.clone(),
            row.repo_url.clone(),
            row.group_type.to_string(),
            row.total_commits.to_string(),
        ])?;
    }

    let mut meta = vec![
        ("Group Type".to_string(), dashboard.group_type.to_string()),
        (
            "Date Range".to_string(),
            format!(
                "{} - {}",
                dashboard.since.to_rfc3339_opts(SecondsFormat::Millis, true),
                dashboard.until.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        ),
        (
            "Average Commits".to_string(),
            dashboard.average_commits.to_string(),
        ),
        (
            "Total Commits".to_string(),
            dashboard.total_commits.to_string(),
        ),
    ];
    if let Some(search) = &dashboard.filters.search {
        meta.push(("Search Filter".to_string(), search.clone()));
    }
    if let Some(min) = dashboard.filters.min_commits {
        meta.push(("Min Commits (>=)".to_string(), min.to_string()));
    }
    if let Some(max) = dashboard.filters.max_commits {
        meta.push(("Max Commits (<=)".to_string(), max.to_string()));
    }

    writer.write_record([""])?;
    for (label, value) in meta {
        writer.write_record([label, value])?;
    }
    writer.flush()?;
    Ok(())
}
