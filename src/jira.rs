use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::logging;

const REQUEST_TIMEOUT_SECS: u64 = 5;
const MAX_RETRIES: usize = 3;

/// Raw issue payload as returned by the REST API. Normalization into the
/// canonical [`crate::ticket::Ticket`] happens in `ticket.rs`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawIssue {
    pub key: String,
    #[serde(default)]
    pub fields: RawFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFields {
    pub summary: Option<String>,
    pub description: Option<Value>,
    pub status: Option<NameField>,
    pub priority: Option<NameField>,
    pub issuetype: Option<NameField>,
    pub assignee: Option<UserField>,
    pub reporter: Option<UserField>,
    pub created: Option<String>,
    pub updated: Option<String>,
    #[serde(rename = "resolutiondate")]
    pub resolution_date: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub components: Vec<NameField>,
    #[serde(rename = "fixVersions", default)]
    pub fix_versions: Vec<NameField>,
    pub parent: Option<RawParent>,
    #[serde(default)]
    pub subtasks: Vec<RawSubtask>,
    #[serde(rename = "issuelinks", default)]
    pub issue_links: Vec<RawIssueLink>,
    pub comment: Option<RawCommentContainer>,
    #[serde(default)]
    pub attachment: Vec<RawAttachment>,
    /// Everything else, notably `customfield_*` entries probed for epic
    /// links. Which ones matter is instance-specific configuration.
    #[serde(flatten)]
    pub custom: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameField {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserField {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "emailAddress")]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawParent {
    pub key: String,
    #[serde(default)]
    pub fields: RawParentFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParentFields {
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSubtask {
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIssueLink {
    #[serde(rename = "type")]
    pub link_type: Option<NameField>,
    #[serde(rename = "outwardIssue")]
    pub outward_issue: Option<RawLinkedIssue>,
    #[serde(rename = "inwardIssue")]
    pub inward_issue: Option<RawLinkedIssue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLinkedIssue {
    pub key: String,
    #[serde(default)]
    pub fields: RawParentFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCommentContainer {
    #[serde(default)]
    pub comments: Vec<RawComment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawComment {
    pub id: Option<String>,
    pub author: Option<UserField>,
    pub body: Option<Value>,
    pub created: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAttachment {
    pub id: Option<String>,
    pub filename: Option<String>,
    pub author: Option<UserField>,
    pub created: Option<String>,
    pub size: Option<u64>,
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    /// Download URL.
    pub content: Option<String>,
}

/// Available workflow transition, fetched per status-change request and
/// never cached.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Transition {
    pub id: String,
    pub name: String,
    pub to_status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub base_url: String,
    pub version: String,
    pub deployment_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum JiraError {
    #[error("jira request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("jira returned HTTP {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode jira response: {source}; body: {body}")]
    Decode {
        source: serde_json::Error,
        body: String,
    },
    #[error("ticket {0} not found")]
    NotFound(String),
    #[error("invalid JIRA_URL '{0}'")]
    InvalidBaseUrl(String),
    #[error("no transition to '{requested}'. Options: {}", available.join(", "))]
    InvalidTransition {
        requested: String,
        available: Vec<String>,
    },
}

/// Blocking REST client. Caller-owned: the CLI builds one per invocation and
/// passes it down, so tests can point it at a mock server.
#[derive(Debug, Clone)]
pub struct JiraClient {
    base_url: String,
    email: String,
    api_token: String,
    http: Client,
}

impl JiraClient {
    pub fn new(base_url: &str, email: &str, api_token: &str) -> Result<Self, JiraError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            email: email.to_string(),
            api_token: api_token.to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.base_url, key)
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/2/{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.email, Some(&self.api_token))
    }

    fn request_with_retry<F>(&self, mut send: F) -> Result<Response, JiraError>
    where
        F: FnMut() -> Result<Response, reqwest::Error>,
    {
        for attempt in 0..=MAX_RETRIES {
            let response = send()?;

            if !is_retryable(response.status()) || attempt == MAX_RETRIES {
                return Ok(response);
            }

            let wait = retry_after_or_backoff(&response, attempt);
            logging::debug(format!(
                "retryable status {} on attempt {}, waiting {:?}",
                response.status(),
                attempt + 1,
                wait
            ));
            thread::sleep(wait);
        }

        unreachable!("retry loop always returns");
    }

    fn expect_success(response: Response) -> Result<Response, JiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().unwrap_or_default();
        Err(JiraError::Http { status, body })
    }

    fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, JiraError> {
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|source| {
            let short_body = if body.len() > 1000 {
                format!("{}...", &body[..1000])
            } else {
                body.clone()
            };
            JiraError::Decode {
                source,
                body: short_body,
            }
        })
    }

    /// Fetch one issue with all fields. 404 maps to [`JiraError::NotFound`].
    pub fn get_issue(&self, key: &str, expand: Option<&str>) -> Result<RawIssue, JiraError> {
        let url = self.api(&format!("issue/{key}"));
        let expand = expand.map(ToString::to_string);
        let response = self.request_with_retry(|| {
            let mut request = self.authed(self.http.get(&url));
            if let Some(expand) = &expand {
                request = request.query(&[("expand", expand.clone())]);
            }
            request.send()
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(JiraError::NotFound(key.to_string()));
        }
        Self::decode(Self::expect_success(response)?)
    }

    /// One page of a JQL search. Zero matches is an empty page, not an error.
    pub fn search_page(
        &self,
        jql: &str,
        max_results: usize,
        start_at: usize,
    ) -> Result<Vec<RawIssue>, JiraError> {
        let url = self.api("search");
        let response = self.request_with_retry(|| {
            self.authed(self.http.get(&url))
                .query(&[
                    ("jql", jql.to_string()),
                    ("startAt", start_at.to_string()),
                    ("maxResults", max_results.to_string()),
                ])
                .send()
        })?;

        let payload: SearchPayload = Self::decode(Self::expect_success(response)?)?;
        logging::debug(format!(
            "search page start_at={} count={}",
            start_at,
            payload.issues.len()
        ));
        Ok(payload.issues)
    }

    /// All matches of a JQL query: sequential pages, stopping when a page
    /// comes back shorter than requested.
    pub fn search_all(&self, jql: &str, page_size: usize) -> Result<Vec<RawIssue>, JiraError> {
        let page_size = page_size.max(1);
        let mut all = Vec::new();
        let mut start_at = 0;

        loop {
            let page = self.search_page(jql, page_size, start_at)?;
            if page.is_empty() {
                break;
            }
            let count = page.len();
            all.extend(page);
            start_at += count;
            if count < page_size {
                break;
            }
        }

        Ok(all)
    }

    pub fn get_comments(&self, key: &str) -> Result<Vec<RawComment>, JiraError> {
        let url = self.api(&format!("issue/{key}/comment"));
        let response = self.request_with_retry(|| self.authed(self.http.get(&url)).send())?;
        let payload: RawCommentContainer = Self::decode(Self::expect_success(response)?)?;
        Ok(payload.comments)
    }

    pub fn get_attachments(&self, key: &str) -> Result<Vec<RawAttachment>, JiraError> {
        let issue = self.get_issue(key, None)?;
        Ok(issue.fields.attachment)
    }

    /// Add a comment; returns the new comment id.
    pub fn add_comment(&self, key: &str, body: &str) -> Result<String, JiraError> {
        let url = self.api(&format!("issue/{key}/comment"));
        let payload = json!({ "body": body });
        let response =
            self.request_with_retry(|| self.authed(self.http.post(&url)).json(&payload).send())?;
        let created: CommentCreated = Self::decode(Self::expect_success(response)?)?;
        Ok(created.id)
    }

    pub fn get_transitions(&self, key: &str) -> Result<Vec<Transition>, JiraError> {
        let url = self.api(&format!("issue/{key}/transitions"));
        let response = self.request_with_retry(|| self.authed(self.http.get(&url)).send())?;
        let payload: TransitionsPayload = Self::decode(Self::expect_success(response)?)?;
        Ok(payload
            .transitions
            .into_iter()
            .map(|t| Transition {
                id: t.id.unwrap_or_default(),
                name: t.name.unwrap_or_default(),
                to_status: t.to.and_then(|s| s.name).unwrap_or_default(),
            })
            .collect())
    }

    /// Transition the ticket towards `target` (a transition name, transition
    /// id, or target status name — see [`resolve_transition`]). Returns the
    /// transition that was applied.
    pub fn update_status(&self, key: &str, target: &str) -> Result<Transition, JiraError> {
        let transitions = self.get_transitions(key)?;
        let resolved = resolve_transition(&transitions, target)?.clone();

        let url = self.api(&format!("issue/{key}/transitions"));
        let payload = json!({ "transition": { "id": resolved.id } });
        let response =
            self.request_with_retry(|| self.authed(self.http.post(&url)).json(&payload).send())?;
        Self::expect_success(response)?;
        Ok(resolved)
    }

    pub fn update_description(&self, key: &str, description: &str) -> Result<(), JiraError> {
        self.update_fields(key, json!({ "description": description }))
    }

    /// Partial field update (`PUT /issue/{key}` with a `fields` object).
    pub fn update_fields(&self, key: &str, fields: Value) -> Result<(), JiraError> {
        let url = self.api(&format!("issue/{key}"));
        let payload = json!({ "fields": fields });
        let response =
            self.request_with_retry(|| self.authed(self.http.put(&url)).json(&payload).send())?;
        Self::expect_success(response)?;
        Ok(())
    }

    /// Assign the ticket; `None` unassigns.
    pub fn assign(&self, key: &str, assignee: Option<&str>) -> Result<(), JiraError> {
        let url = self.api(&format!("issue/{key}/assignee"));
        let payload = json!({ "name": assignee });
        let response =
            self.request_with_retry(|| self.authed(self.http.put(&url)).json(&payload).send())?;
        Self::expect_success(response)?;
        Ok(())
    }

    pub fn link_tickets(
        &self,
        from_key: &str,
        to_key: &str,
        link_type: &str,
    ) -> Result<(), JiraError> {
        let url = self.api("issueLink");
        let payload = json!({
            "type": { "name": link_type },
            "inwardIssue": { "key": to_key },
            "outwardIssue": { "key": from_key },
        });
        let response =
            self.request_with_retry(|| self.authed(self.http.post(&url)).json(&payload).send())?;
        Self::expect_success(response)?;
        Ok(())
    }

    /// Create an issue from a prepared `fields` object; returns the new key.
    pub fn create_issue(&self, fields: Value) -> Result<String, JiraError> {
        let url = self.api("issue");
        let payload = json!({ "fields": fields });
        let response =
            self.request_with_retry(|| self.authed(self.http.post(&url)).json(&payload).send())?;
        let created: IssueCreated = Self::decode(Self::expect_success(response)?)?;
        Ok(created.key)
    }

    pub fn server_info(&self) -> Result<ServerInfo, JiraError> {
        let url = self.api("serverInfo");
        let response = self.request_with_retry(|| self.authed(self.http.get(&url)).send())?;
        let payload: ServerInfoPayload = Self::decode(Self::expect_success(response)?)?;
        Ok(ServerInfo {
            base_url: payload.base_url.unwrap_or_default(),
            version: payload.version.unwrap_or_default(),
            deployment_type: payload.deployment_type.unwrap_or_default(),
        })
    }
}

/// Pick the transition matching `requested`. Resolution order: exact
/// transition name (case-insensitive), exact transition id, target status
/// name (case-insensitive), then suffix match so that "Ready" still hits a
/// verbose label like "Open to Ready". No match reports the valid options.
pub fn resolve_transition<'a>(
    transitions: &'a [Transition],
    requested: &str,
) -> Result<&'a Transition, JiraError> {
    let wanted = requested.trim().to_lowercase();

    let found = transitions
        .iter()
        .find(|t| t.name.to_lowercase() == wanted)
        .or_else(|| transitions.iter().find(|t| t.id == requested.trim()))
        .or_else(|| {
            transitions
                .iter()
                .find(|t| !t.to_status.is_empty() && t.to_status.to_lowercase() == wanted)
        })
        .or_else(|| {
            transitions.iter().find(|t| {
                let name = t.name.to_lowercase();
                name.ends_with(&wanted) || name.ends_with(&format!("to {wanted}"))
            })
        });

    found.ok_or_else(|| JiraError::InvalidTransition {
        requested: requested.to_string(),
        available: transitions.iter().map(|t| t.name.clone()).collect(),
    })
}

fn normalize_base_url(raw: &str) -> Result<String, JiraError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(JiraError::InvalidBaseUrl(raw.to_string()));
    }

    let mut candidate = trimmed.to_string();
    if candidate.starts_with("https//") {
        candidate = format!("https://{}", candidate.trim_start_matches("https//"));
    } else if candidate.starts_with("http//") {
        candidate = format!("http://{}", candidate.trim_start_matches("http//"));
    } else if !candidate.starts_with("https://") && !candidate.starts_with("http://") {
        candidate = format!("https://{candidate}");
    }

    let parsed =
        reqwest::Url::parse(&candidate).map_err(|_| JiraError::InvalidBaseUrl(raw.to_string()))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after_or_backoff(response: &Response, attempt: usize) -> Duration {
    if let Some(header) = response.headers().get("Retry-After") {
        if let Ok(value) = header.to_str() {
            if let Ok(seconds) = value.parse::<u64>() {
                return Duration::from_secs(seconds.min(30));
            }
        }
    }

    Duration::from_secs(1_u64 << attempt.min(4))
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct CommentCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IssueCreated {
    key: String,
}

#[derive(Debug, Default, Deserialize)]
struct TransitionsPayload {
    #[serde(default)]
    transitions: Vec<TransitionPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct TransitionPayload {
    id: Option<String>,
    name: Option<String>,
    to: Option<NameField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoPayload {
    base_url: Option<String>,
    version: Option<String>,
    deployment_type: Option<String>,
}
