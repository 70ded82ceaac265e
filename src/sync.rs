use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::Config;
use crate::jira::{JiraClient, JiraError};
use crate::logging;
use crate::markup::sanitize_name;
use crate::render::{self, FormattedDocument};
use crate::ticket::{self, Ticket};

const DEFAULT_INDEX_NAME: &str = "index.md";

/// Outcome of one sync command. A file counts as created or updated purely
/// by whether it existed beforehand; content is always overwritten.
#[derive(Debug, Default, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub tickets_synced: usize,
    pub files_created: Vec<PathBuf>,
    pub files_updated: Vec<PathBuf>,
    pub errors: Vec<String>,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Jira(#[from] JiraError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Orchestrates fetch → normalize → render → write for one command's worth
/// of tickets. Holds borrowed handles only; nothing survives the invocation.
pub struct Syncer<'a> {
    client: &'a JiraClient,
    config: &'a Config,
}

impl<'a> Syncer<'a> {
    pub fn new(client: &'a JiraClient, config: &'a Config) -> Self {
        Self { client, config }
    }

    /// Fetch one ticket and normalize it with the configured field
    /// candidates.
    pub fn fetch_ticket(&self, key: &str) -> Result<Ticket, JiraError> {
        let raw = self.client.get_issue(key, Some("changelog"))?;
        Ok(ticket::normalize(
            &raw,
            self.client.base_url(),
            &self.config.epic_link_fields,
            &self.config.epic_name_fields,
        ))
    }

    /// Sync a single ticket. Fetch or write failures land in `errors`; the
    /// result always comes back.
    pub fn sync_ticket(&self, key: &str, category: Option<&str>, force: bool) -> SyncResult {
        if force {
            logging::debug(format!("forced resync of {key}"));
        }
        let mut result = SyncResult::default();
        match self.fetch_ticket(key) {
            Ok(ticket) => self.write_ticket(&ticket, category, &mut result),
            Err(err) => result.errors.push(format!("{key}: {err}")),
        }
        finish(result)
    }

    /// Sync several tickets by key. One bad key never blocks the rest.
    pub fn sync_tickets(&self, keys: &[String], category: Option<&str>) -> SyncResult {
        let mut result = SyncResult::default();
        for key in keys {
            match self.fetch_ticket(key) {
                Ok(ticket) => self.write_ticket(&ticket, category, &mut result),
                Err(err) => result.errors.push(format!("{key}: {err}")),
            }
        }
        finish(result)
    }

    /// Sync everything matching a JQL query. The query failing is a remote
    /// error; individual write failures aggregate into the result.
    pub fn sync_jql(
        &self,
        jql: &str,
        category: Option<&str>,
        create_index: bool,
        index_name: Option<&str>,
    ) -> Result<SyncResult, SyncError> {
        let raw_issues = self
            .client
            .search_all(jql, self.config.defaults.max_results)?;
        let tickets = self.normalize_all(&raw_issues);

        let mut result = SyncResult::default();
        for ticket in &tickets {
            self.write_ticket(ticket, category, &mut result);
        }

        if create_index && !tickets.is_empty() {
            let content = render::render_ticket_list(&tickets, "Tickets", self.config);
            self.write_index(category, index_name, &content, &mut result);
        }

        Ok(finish(result))
    }

    /// Fetch an epic and its children. Children are discovered through both
    /// the classic epic-link field and the newer `parent` hierarchy, and
    /// deduplicated by key (a child can match both clauses).
    pub fn fetch_epic(&self, epic_key: &str) -> Result<(Ticket, Vec<Ticket>), JiraError> {
        let epic = self.fetch_ticket(epic_key)?;

        let jql = format!("\"Epic Link\" = {epic_key} OR parent = {epic_key}");
        let raw_children = self
            .client
            .search_all(&jql, self.config.defaults.max_results)?;

        let mut seen: BTreeSet<String> = BTreeSet::new();
        seen.insert(epic.key.clone());
        let mut children: Vec<Ticket> = Vec::new();
        for child in self.normalize_all(&raw_children) {
            if seen.insert(child.key.clone()) {
                children.push(child);
            }
        }
        Ok((epic, children))
    }

    /// Sync an epic and all of its children into a folder derived from the
    /// epic summary.
    pub fn sync_epic(&self, epic_key: &str, create_index: bool) -> Result<SyncResult, SyncError> {
        let (epic, children) = self.fetch_epic(epic_key)?;

        let mut folder = sanitize_name(&epic.summary, 30, false);
        if folder.is_empty() {
            folder = epic.key.clone();
        }

        let mut result = SyncResult::default();
        self.write_ticket(&epic, Some(&folder), &mut result);
        for child in &children {
            self.write_ticket(child, Some(&folder), &mut result);
        }

        if create_index {
            let title = format!("Epic {}: {}", epic.key, epic.summary);
            let mut listed = vec![epic.clone()];
            listed.extend(children.iter().cloned());
            let content = render::render_ticket_list(&listed, &title, self.config);
            self.write_index(Some(&folder), None, &content, &mut result);
        }

        Ok(finish(result))
    }

    /// Sync a project's tickets with optional filters. The configured
    /// excluded-statuses clause is always applied.
    pub fn sync_project(
        &self,
        project_key: &str,
        status: Option<&str>,
        issue_type: Option<&str>,
        assignee: Option<&str>,
        create_index: bool,
    ) -> Result<SyncResult, SyncError> {
        let jql = project_jql(self.config, project_key, status, issue_type, assignee);
        logging::debug(format!("project sync jql: {jql}"));

        let raw_issues = self
            .client
            .search_all(&jql, self.config.defaults.max_results)?;
        let tickets = self.normalize_all(&raw_issues);

        let mut result = SyncResult::default();
        for ticket in &tickets {
            self.write_ticket(ticket, None, &mut result);
        }

        if create_index && !tickets.is_empty() {
            let title = format!("Project {project_key}");
            let content = render::render_ticket_list(&tickets, &title, self.config);
            self.write_index(None, None, &content, &mut result);
        }
        Ok(finish(result))
    }

    fn normalize_all(&self, raw_issues: &[crate::jira::RawIssue]) -> Vec<Ticket> {
        ticket::normalize_all(
            raw_issues,
            self.client.base_url(),
            &self.config.epic_link_fields,
            &self.config.epic_name_fields,
        )
    }

    fn write_ticket(&self, ticket: &Ticket, category: Option<&str>, result: &mut SyncResult) {
        let doc = render::render_ticket(ticket, self.config, category);
        match self.write_document(&doc) {
            Ok((path, existed)) => {
                result.tickets_synced += 1;
                if existed {
                    result.files_updated.push(path);
                } else {
                    result.files_created.push(path);
                }
            }
            Err(err) => result.errors.push(format!("{}: {err}", ticket.key)),
        }
    }

    fn write_index(
        &self,
        category: Option<&str>,
        index_name: Option<&str>,
        content: &str,
        result: &mut SyncResult,
    ) {
        let doc = FormattedDocument {
            filename: index_name.unwrap_or(DEFAULT_INDEX_NAME).to_string(),
            content: content.to_string(),
            category: category.unwrap_or_default().to_string(),
        };
        match self.write_document(&doc) {
            Ok((path, existed)) => {
                if existed {
                    result.files_updated.push(path);
                } else {
                    result.files_created.push(path);
                }
            }
            Err(err) => result.errors.push(format!("index: {err}")),
        }
    }

    /// Write the document under `vault/tickets_folder/[category/]filename`.
    /// Returns the path and whether the file already existed.
    fn write_document(&self, doc: &FormattedDocument) -> Result<(PathBuf, bool), SyncError> {
        let mut dir = self.config.tickets_path();
        if !doc.category.is_empty() {
            dir = dir.join(&doc.category);
        }
        fs::create_dir_all(&dir).map_err(|source| SyncError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(&doc.filename);
        let existed = path.exists();
        fs::write(&path, &doc.content).map_err(|source| SyncError::Io {
            path: path.clone(),
            source,
        })?;
        logging::debug(format!(
            "wrote {} ({})",
            path.display(),
            if existed { "updated" } else { "created" }
        ));
        Ok((path, existed))
    }
}

fn project_jql(
    config: &Config,
    project_key: &str,
    status: Option<&str>,
    issue_type: Option<&str>,
    assignee: Option<&str>,
) -> String {
    let mut parts = vec![format!("project = {project_key}")];
    if let Some(status) = status {
        parts.push(format!("status = \"{status}\""));
    }
    if let Some(issue_type) = issue_type {
        parts.push(format!("issuetype = \"{issue_type}\""));
    }
    if let Some(assignee) = assignee {
        if assignee == "currentUser()" {
            parts.push("assignee = currentUser()".to_string());
        } else {
            parts.push(format!("assignee = \"{assignee}\""));
        }
    }
    if let Some(clause) = config.exclusion_clause() {
        parts.push(clause);
    }
    format!("{} ORDER BY created DESC", parts.join(" AND "))
}

fn finish(mut result: SyncResult) -> SyncResult {
    result.success = result.errors.is_empty();
    let mut message = format!(
        "Synced {} ticket(s): {} created, {} updated",
        result.tickets_synced,
        result.files_created.len(),
        result.files_updated.len()
    );
    if !result.errors.is_empty() {
        message.push_str(&format!(", {} error(s)", result.errors.len()));
    }
    result.message = message;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use tempfile::tempdir;

    fn test_config(vault: &std::path::Path) -> Config {
        let mut cfg =
            config::load_with_layers(None, None, None, Default::default()).expect("config");
        cfg.vault_path = vault.to_path_buf();
        cfg
    }

    fn issue_body(key: &str, summary: &str) -> serde_json::Value {
        serde_json::json!({
            "key": key,
            "fields": {
                "summary": summary,
                "status": {"name": "In Progress"},
                "priority": {"name": "High"},
                "issuetype": {"name": "Task"}
            }
        })
    }

    fn mock_issue(server: &MockServer, key: &str, summary: &str) {
        let body = issue_body(key, summary);
        server.mock(|when, then| {
            when.method(GET).path(format!("/rest/api/2/issue/{key}"));
            then.status(200).json_body_obj(&body);
        });
    }

    #[test]
    fn batch_sync_collects_per_key_failures_without_aborting() {
        let server = MockServer::start();
        let vault = tempdir().expect("vault dir");
        mock_issue(&server, "A-1", "First");
        mock_issue(&server, "A-2", "Second");
        server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/issue/BAD-1");
            then.status(404)
                .json_body_obj(&serde_json::json!({"errorMessages": ["no such issue"]}));
        });

        let client = JiraClient::new(&server.base_url(), "e", "t").expect("client");
        let cfg = test_config(vault.path());
        let syncer = Syncer::new(&client, &cfg);

        let keys = vec!["A-1".to_string(), "A-2".to_string(), "BAD-1".to_string()];
        let result = syncer.sync_tickets(&keys, None);

        assert!(!result.success);
        assert_eq!(result.tickets_synced, 2);
        assert_eq!(result.files_created.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("BAD-1"));
    }

    #[test]
    fn resync_reports_updated_when_file_already_exists() {
        let server = MockServer::start();
        let vault = tempdir().expect("vault dir");
        mock_issue(&server, "A-1", "First");

        let client = JiraClient::new(&server.base_url(), "e", "t").expect("client");
        let cfg = test_config(vault.path());
        let syncer = Syncer::new(&client, &cfg);

        let first = syncer.sync_ticket("A-1", None, false);
        assert!(first.success);
        assert_eq!(first.files_created.len(), 1);
        assert_eq!(first.files_updated.len(), 0);

        // identical content still counts as updated: existence decides
        let second = syncer.sync_ticket("A-1", None, false);
        assert_eq!(second.files_created.len(), 0);
        assert_eq!(second.files_updated.len(), 1);
        assert_eq!(second.files_updated[0], first.files_created[0]);
        assert!(second.message.contains("1 updated"));
    }

    #[test]
    fn ticket_lands_in_its_category_folder() {
        let server = MockServer::start();
        let vault = tempdir().expect("vault dir");
        mock_issue(&server, "A-1", "First");

        let client = JiraClient::new(&server.base_url(), "e", "t").expect("client");
        let cfg = test_config(vault.path());
        let syncer = Syncer::new(&client, &cfg);

        let result = syncer.sync_ticket("A-1", Some("Sprint 12"), false);
        assert!(result.success);
        let expected = vault
            .path()
            .join("tickets")
            .join("Sprint 12")
            .join("A-1-first.md");
        assert_eq!(result.files_created[0], expected);
        assert!(expected.exists());
    }

    #[test]
    fn epic_sync_dedups_children_matched_by_both_link_styles() {
        let server = MockServer::start();
        let vault = tempdir().expect("vault dir");
        mock_issue(&server, "EPIC-1", "Payment Epic");
        // the same child can match both the epic-link and the parent clause
        server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/search");
            then.status(200).json_body_obj(&serde_json::json!({
                "issues": [
                    issue_body("EPIC-1-A", "Child A"),
                    issue_body("EPIC-1-A", "Child A"),
                    issue_body("EPIC-1-B", "Child B")
                ]
            }));
        });

        let client = JiraClient::new(&server.base_url(), "e", "t").expect("client");
        let cfg = test_config(vault.path());
        let syncer = Syncer::new(&client, &cfg);

        let result = syncer.sync_epic("EPIC-1", true).expect("epic sync");
        assert!(result.success);
        // epic + two distinct children
        assert_eq!(result.tickets_synced, 3);

        let folder = vault.path().join("tickets").join("Payment Epic");
        assert!(folder.join("EPIC-1-payment-epic.md").exists());
        assert!(folder.join("EPIC-1-A-child-a.md").exists());
        assert!(folder.join("EPIC-1-B-child-b.md").exists());

        let index = std::fs::read_to_string(folder.join("index.md")).expect("index");
        assert!(index.starts_with("# Epic EPIC-1: Payment Epic"));
    }

    #[test]
    fn jql_sync_writes_wholesale_index() {
        let server = MockServer::start();
        let vault = tempdir().expect("vault dir");
        server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/search");
            then.status(200).json_body_obj(&serde_json::json!({
                "issues": [issue_body("A-1", "First"), issue_body("A-2", "Second")]
            }));
        });

        let client = JiraClient::new(&server.base_url(), "e", "t").expect("client");
        let cfg = test_config(vault.path());
        let syncer = Syncer::new(&client, &cfg);

        let result = syncer
            .sync_jql("project = A", Some("Imports"), true, Some("imports.md"))
            .expect("jql sync");
        assert!(result.success);
        assert_eq!(result.tickets_synced, 2);
        // two tickets plus the index
        assert_eq!(result.files_created.len(), 3);

        let index = vault
            .path()
            .join("tickets")
            .join("Imports")
            .join("imports.md");
        let content = std::fs::read_to_string(index).expect("index");
        assert!(content.contains("- **Total tickets:** 2"));
    }

    #[test]
    fn project_jql_applies_filters_and_exclusions() {
        let dir = tempdir().expect("vault dir");
        let mut cfg = test_config(dir.path());
        cfg.defaults.excluded_statuses = vec!["Done".to_string(), "Closed".to_string()];

        let jql = project_jql(&cfg, "SR", Some("Ready"), Some("Bug"), Some("currentUser()"));
        assert_eq!(
            jql,
            "project = SR AND status = \"Ready\" AND issuetype = \"Bug\" AND \
             assignee = currentUser() AND status NOT IN (\"Done\", \"Closed\") \
             ORDER BY created DESC"
        );

        cfg.defaults.excluded_statuses.clear();
        let jql = project_jql(&cfg, "SR", None, None, Some("ada@example.com"));
        assert_eq!(
            jql,
            "project = SR AND assignee = \"ada@example.com\" ORDER BY created DESC"
        );
    }

    #[test]
    fn unwritable_vault_is_reported_per_item() {
        let server = MockServer::start();
        mock_issue(&server, "A-1", "First");

        let client = JiraClient::new(&server.base_url(), "e", "t").expect("client");
        let vault = tempdir().expect("vault dir");
        let mut cfg = test_config(vault.path());
        // a file where the tickets folder should be makes create_dir_all fail
        std::fs::write(vault.path().join("tickets"), b"not a dir").expect("blocker");

        let syncer = Syncer::new(&client, &cfg);
        let result = syncer.sync_ticket("A-1", None, false);
        assert!(!result.success);
        assert_eq!(result.tickets_synced, 0);
        assert_eq!(result.errors.len(), 1);

        cfg.vault_path = vault.path().join("elsewhere");
        let syncer = Syncer::new(&client, &cfg);
        assert!(syncer.sync_ticket("A-1", None, false).success);
    }
}
