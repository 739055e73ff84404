//! Thin client for the GitHub issues API of the project repository.

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_REPO: &str = "RaioPhysics/Website";

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("Title and body are required")]
    MissingFields,
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("issue tracker unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct IssueTrackerConfig {
    pub api_url: String,
    pub repo: String,
    pub token: Option<String>,
}

impl Default for IssueTrackerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            repo: DEFAULT_REPO.to_string(),
            token: None,
        }
    }
}

#[derive(Serialize)]
struct NewIssue<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Clone)]
pub struct IssueTracker {
    client: reqwest::Client,
    issues_url: String,
    token: Option<String>,
}

impl IssueTracker {
    pub fn new(config: IssueTrackerConfig) -> Self {
        let issues_url = format!(
            "{}/repos/{}/issues",
            config.api_url.trim_end_matches('/'),
            config.repo
        );
        if config.token.is_none() {
            warn!("no issue tracker token configured; issue requests will be rejected upstream");
        }
        Self {
            client: reqwest::Client::new(),
            issues_url,
            token: config.token,
        }
    }

    pub fn issues_url(&self) -> &str {
        &self.issues_url
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, &self.issues_url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(USER_AGENT, concat!("isocenter-qa/", env!("CARGO_PKG_VERSION")));
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => req,
        }
    }

    /// Open a new issue. Both fields must be non-empty; nothing is sent
    /// otherwise.
    pub async fn create_issue(&self, title: &str, body: &str) -> Result<(), IssueError> {
        if title.is_empty() || body.is_empty() {
            return Err(IssueError::MissingFields);
        }
        let resp = self
            .request(reqwest::Method::POST)
            .json(&NewIssue { title, body })
            .send()
            .await?;
        let status = resp.status();
        info!("issue create status={}", status.as_u16());
        if status == StatusCode::CREATED {
            Ok(())
        } else {
            Err(IssueError::Rejected {
                status: status.as_u16(),
                message: "Failed to create issue".to_string(),
            })
        }
    }

    /// Fetch the repository's issues, returning the remote JSON untouched.
    pub async fn list_issues(&self) -> Result<Value, IssueError> {
        let resp = self.request(reqwest::Method::GET).send().await?;
        let status = resp.status();
        info!("issue list status={}", status.as_u16());
        if status == StatusCode::OK {
            Ok(resp.json::<Value>().await?)
        } else {
            Err(IssueError::Rejected {
                status: status.as_u16(),
                message: "Failed to fetch issues".to_string(),
            })
        }
    }
}
