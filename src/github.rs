use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{Result, TrackerError};
use crate::models::FetchedCommit;
use crate::repo_url::{parse_repo_url, RepoRef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCommit {
    pub sha: Option<String>,
    pub html_url: Option<String>,
    pub commit: Option<RawCommitDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCommitDetail {
    pub message: Option<String>,
    pub author: Option<RawSignature>,
    pub committer: Option<RawSignature>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSignature {
    pub date: Option<String>,
}

fn parse_date(sig: Option<&RawSignature>) -> Option<DateTime<Utc>> {
    let raw = sig?.date.as_deref()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

impl RawCommit {
    /// `None` when the record has no hash or no usable date.
    pub fn normalize(self) -> Option<FetchedCommit> {
        let hash = self.sha.filter(|s| !s.trim().is_empty())?;
        let detail = self.commit.unwrap_or_default();
        let author_date =
            parse_date(detail.author.as_ref()).or_else(|| parse_date(detail.committer.as_ref()))?;

        Some(FetchedCommit {
            hash,
            message: detail.message,
            source_url: self.html_url,
            author_date,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("resource not found")]
    NotFound,
    #[error("request forbidden (status {0})")]
    Forbidden(u16),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait CommitSource: Send + Sync {
    async fn list_commits(
        &self,
        repo: &RepoRef,
        window: &CommitWindow,
        page: u32,
        per_page: u32,
    ) -> std::result::Result<Vec<RawCommit>, SourceError>;
}

pub fn classify_status(status: StatusCode) -> Option<SourceError> {
    match status {
        StatusCode::NOT_FOUND => Some(SourceError::NotFound),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            Some(SourceError::Forbidden(status.as_u16()))
        }
        s if !s.is_success() => Some(SourceError::Status(s.as_u16())),
        _ => None,
    }
}

pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: config.github_api_base.trim_end_matches('/').to_string(),
            token: config.github_token.clone(),
        })
    }

    fn request(
        &self,
        repo: &RepoRef,
        window: &CommitWindow,
        page: u32,
        per_page: u32,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}/repos/{}/{}/commits", self.api_base, repo.owner, repo.repo);
        let mut query = vec![
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(since) = window.since {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        if let Some(until) = window.until {
            query.push(("until", until.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let builder = self
            .http
            .get(url)
            .query(&query)
            .header(ACCEPT, "application/vnd.github+json");

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl CommitSource for GithubClient {
    async fn list_commits(
        &self,
        repo: &RepoRef,
        window: &CommitWindow,
        page: u32,
        per_page: u32,
    ) -> std::result::Result<Vec<RawCommit>, SourceError> {
        let response = self.request(repo, window, page, per_page).send().await?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }
        Ok(response.json::<Vec<RawCommit>>().await?)
    }
}

fn map_source_error(repo_url: &str, err: SourceError) -> TrackerError {
    match err {
        SourceError::NotFound => TrackerError::RepositoryNotFound {
            url: repo_url.to_string(),
        },
        SourceError::Forbidden(_) => TrackerError::RateLimitExceeded,
        other => TrackerError::FetchFailed {
            url: repo_url.to_string(),
            source: Box::new(other),
        },
    }
}

#[derive(Clone)]
pub struct CommitFetcher {
    source: Arc<dyn CommitSource>,
    page_size: u32,
}

impl CommitFetcher {
    pub fn new(source: Arc<dyn CommitSource>, page_size: u32) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
        }
    }

    pub async fn fetch_commits(
        &self,
        repo_url: &str,
        window: &CommitWindow,
    ) -> Result<Vec<FetchedCommit>> {
        let repo = parse_repo_url(repo_url)?;
        let mut commits = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1u32;

        loop {
            let raw = self
                .source
                .list_commits(&repo, window, page, self.page_size)
                .await
                .map_err(|e| map_source_error(repo_url, e))?;
            let received = raw.len();
            tracing::debug!(repo = %repo, page, received, "fetched commit page");

            for commit in raw.into_iter().filter_map(RawCommit::normalize) {
                if seen.insert(commit.hash.clone()) {
                    commits.push(commit);
                }
            }

            if received < self.page_size as usize {
                break;
            }
            page += 1;
        }

        Ok(commits)
    }
}
