use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, TrackerError};

static HTTPS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^https?://(?:www\.)?github\.com/(?P<owner>[\w.-]+)/(?P<repo>[\w.-]+?)(?:\.git)?(?:[/?#].*)?$",
    )
    .expect("valid https repository pattern")
});

static SSH_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^git@github\.com:(?P<owner>[\w.-]+)/(?P<repo>[\w.-]+?)(?:\.git)?/?$")
        .expect("valid ssh repository pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

pub fn parse_repo_url(input: &str) -> Result<RepoRef> {
    let trimmed = input.trim();
    let captures = SSH_URL
        .captures(trimmed)
        .or_else(|| HTTPS_URL.captures(trimmed))
        .ok_or_else(|| TrackerError::InvalidRepositoryUrl {
            input: input.to_string(),
        })?;

    Ok(RepoRef {
        owner: captures["owner"].to_string(),
        repo: captures["repo"].to_string(),
    })
}
