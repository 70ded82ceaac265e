use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const PROJECT_CONFIG_FILE: &str = ".jira-vault.toml";

/// Fully resolved configuration. Layer precedence, highest first: explicit
/// `--config` file, project-local file, user-global file, environment
/// variables, built-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub jira_url: String,
    pub jira_email: String,
    pub jira_api_token: String,
    pub vault_path: PathBuf,
    pub tickets_folder: String,
    pub include_comments: bool,
    pub include_attachments: bool,
    pub include_links: bool,
    pub status_tags: BTreeMap<String, String>,
    pub priority_tags: BTreeMap<String, String>,
    pub type_tags: BTreeMap<String, String>,
    pub saved_queries: BTreeMap<String, String>,
    pub defaults: Defaults,
    pub epic_link_fields: Vec<String>,
    pub epic_name_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Defaults {
    pub project_key: Option<String>,
    pub user: Option<String>,
    pub excluded_statuses: Vec<String>,
    pub max_results: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {path}")]
    MissingConfigFile { path: PathBuf },
    #[error("failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse TOML config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("missing credentials: {}", missing.join(", "))]
    MissingCredentials { missing: Vec<String> },
    #[error("cannot resolve config directory: HOME is not set and XDG_CONFIG_HOME is unset")]
    MissingHomeDirectory,
}

/// One configuration layer as read from a file or the environment. Every
/// field is optional; merging a later layer overrides whatever it sets.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    jira_url: Option<String>,
    jira_email: Option<String>,
    jira_api_token: Option<String>,
    vault_path: Option<PathBuf>,
    tickets_folder: Option<String>,
    include_comments: Option<bool>,
    include_attachments: Option<bool>,
    include_links: Option<bool>,
    status_tags: Option<BTreeMap<String, String>>,
    priority_tags: Option<BTreeMap<String, String>>,
    type_tags: Option<BTreeMap<String, String>>,
    saved_queries: Option<BTreeMap<String, String>>,
    #[serde(default)]
    defaults: RawDefaults,
    epic_link_fields: Option<Vec<String>>,
    epic_name_fields: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDefaults {
    project_key: Option<String>,
    user: Option<String>,
    excluded_statuses: Option<Vec<String>>,
    max_results: Option<usize>,
}

impl RawConfig {
    fn merge(&mut self, over: RawConfig) {
        merge_field(&mut self.jira_url, over.jira_url);
        merge_field(&mut self.jira_email, over.jira_email);
        merge_field(&mut self.jira_api_token, over.jira_api_token);
        merge_field(&mut self.vault_path, over.vault_path);
        merge_field(&mut self.tickets_folder, over.tickets_folder);
        merge_field(&mut self.include_comments, over.include_comments);
        merge_field(&mut self.include_attachments, over.include_attachments);
        merge_field(&mut self.include_links, over.include_links);
        merge_field(&mut self.status_tags, over.status_tags);
        merge_field(&mut self.priority_tags, over.priority_tags);
        merge_field(&mut self.type_tags, over.type_tags);
        merge_field(&mut self.saved_queries, over.saved_queries);
        merge_field(&mut self.defaults.project_key, over.defaults.project_key);
        merge_field(&mut self.defaults.user, over.defaults.user);
        merge_field(
            &mut self.defaults.excluded_statuses,
            over.defaults.excluded_statuses,
        );
        merge_field(&mut self.defaults.max_results, over.defaults.max_results);
        merge_field(&mut self.epic_link_fields, over.epic_link_fields);
        merge_field(&mut self.epic_name_fields, over.epic_name_fields);
    }
}

fn merge_field<T>(base: &mut Option<T>, over: Option<T>) {
    if over.is_some() {
        *base = over;
    }
}

/// Load configuration from the standard layers plus an optional explicit
/// file. The explicit file must exist; the other file layers are skipped
/// silently when absent.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let project = PathBuf::from(PROJECT_CONFIG_FILE);
    let global = user_config_path();
    load_with_layers(
        explicit,
        Some(project.as_path()),
        global.as_deref(),
        env_layer(),
    )
}

pub fn load_with_layers(
    explicit: Option<&Path>,
    project: Option<&Path>,
    global: Option<&Path>,
    env: RawConfig,
) -> Result<Config, ConfigError> {
    let mut raw = env;

    if let Some(path) = global {
        if path.exists() {
            raw.merge(read_raw(path)?);
        }
    }
    if let Some(path) = project {
        if path.exists() {
            raw.merge(read_raw(path)?);
        }
    }
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::MissingConfigFile {
                path: path.to_path_buf(),
            });
        }
        raw.merge(read_raw(path)?);
    }

    Ok(finalize(raw))
}

fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let payload = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&payload).map_err(|source| ConfigError::ParseFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn env_layer() -> RawConfig {
    RawConfig {
        jira_url: non_empty_env("JIRA_URL"),
        jira_email: non_empty_env("JIRA_EMAIL"),
        jira_api_token: non_empty_env("JIRA_API_TOKEN"),
        vault_path: non_empty_env("VAULT_PATH").map(PathBuf::from),
        tickets_folder: non_empty_env("TICKETS_FOLDER"),
        ..RawConfig::default()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `$XDG_CONFIG_HOME/jira-vault/config.toml`, falling back to
/// `~/.config/jira-vault/config.toml`. `None` when neither variable is set.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_path_from_env(std::env::var_os("XDG_CONFIG_HOME"), std::env::var_os("HOME"))
}

fn user_config_path_from_env(
    xdg_config_home: Option<OsString>,
    home: Option<OsString>,
) -> Option<PathBuf> {
    if let Some(dir) = xdg_config_home.filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(dir).join("jira-vault").join("config.toml"));
    }
    let home = home.filter(|value| !value.is_empty())?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("jira-vault")
            .join("config.toml"),
    )
}

fn finalize(raw: RawConfig) -> Config {
    Config {
        jira_url: raw
            .jira_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_default(),
        jira_email: raw.jira_email.unwrap_or_default(),
        jira_api_token: raw.jira_api_token.unwrap_or_default(),
        vault_path: raw
            .vault_path
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))),
        tickets_folder: raw.tickets_folder.unwrap_or_else(|| "tickets".to_string()),
        include_comments: raw.include_comments.unwrap_or(true),
        include_attachments: raw.include_attachments.unwrap_or(true),
        include_links: raw.include_links.unwrap_or(true),
        status_tags: raw.status_tags.unwrap_or_else(default_status_tags),
        priority_tags: raw.priority_tags.unwrap_or_else(default_priority_tags),
        type_tags: raw.type_tags.unwrap_or_else(default_type_tags),
        saved_queries: raw.saved_queries.unwrap_or_default(),
        defaults: Defaults {
            project_key: raw.defaults.project_key,
            user: raw.defaults.user,
            excluded_statuses: raw.defaults.excluded_statuses.unwrap_or_default(),
            max_results: raw.defaults.max_results.unwrap_or(50),
        },
        epic_link_fields: raw.epic_link_fields.unwrap_or_else(|| {
            vec![
                "customfield_10014".to_string(),
                "customfield_10008".to_string(),
            ]
        }),
        epic_name_fields: raw
            .epic_name_fields
            .unwrap_or_else(|| vec!["customfield_10011".to_string()]),
    }
}

impl Config {
    /// Fail if any credential needed for a remote call is missing. Called
    /// before the first network use; `init` skips it.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.jira_url.trim().is_empty() {
            missing.push("JIRA_URL".to_string());
        }
        if self.jira_email.trim().is_empty() {
            missing.push("JIRA_EMAIL".to_string());
        }
        if self.jira_api_token.trim().is_empty() {
            missing.push("JIRA_API_TOKEN".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingCredentials { missing })
        }
    }

    pub fn tickets_path(&self) -> PathBuf {
        self.vault_path.join(&self.tickets_folder)
    }

    pub fn status_tag(&self, status: &str) -> String {
        tag_or_fallback(&self.status_tags, status, "status")
    }

    pub fn priority_tag(&self, priority: &str) -> String {
        tag_or_fallback(&self.priority_tags, priority, "priority")
    }

    pub fn type_tag(&self, issue_type: &str) -> String {
        tag_or_fallback(&self.type_tags, issue_type, "type")
    }

    pub fn saved_query(&self, name: &str) -> Option<&str> {
        self.saved_queries.get(name).map(String::as_str)
    }

    /// JQL clause excluding the configured statuses, or `None` when the list
    /// is empty.
    pub fn exclusion_clause(&self) -> Option<String> {
        if self.defaults.excluded_statuses.is_empty() {
            return None;
        }
        let quoted: Vec<String> = self
            .defaults
            .excluded_statuses
            .iter()
            .map(|s| format!("\"{s}\""))
            .collect();
        Some(format!("status NOT IN ({})", quoted.join(", ")))
    }
}

/// Persist a saved query into a config file (created if absent), leaving the
/// rest of the file's contents untouched.
pub fn save_query(path: &Path, name: &str, jql: &str) -> Result<(), ConfigError> {
    let mut doc: toml::Table = if path.exists() {
        let payload = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&payload).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        toml::Table::new()
    };

    let queries = doc
        .entry("saved_queries".to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    if let Some(table) = queries.as_table_mut() {
        table.insert(name.to_string(), toml::Value::String(jql.to_string()));
    }

    let serialized = toml::to_string_pretty(&doc)?;
    std::fs::write(path, serialized).map_err(|source| ConfigError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn tag_or_fallback(table: &BTreeMap<String, String>, value: &str, prefix: &str) -> String {
    if let Some(tag) = table.get(value) {
        return tag.clone();
    }
    format!("{prefix}/{}", value.to_lowercase().replace(' ', "-"))
}

fn default_status_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("To Do".to_string(), "status/todo".to_string()),
        ("In Progress".to_string(), "status/in-progress".to_string()),
        ("Ready".to_string(), "status/ready".to_string()),
        ("Done".to_string(), "status/done".to_string()),
        ("Closed".to_string(), "status/closed".to_string()),
    ])
}

fn default_priority_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Highest".to_string(), "priority/highest".to_string()),
        ("High".to_string(), "priority/high".to_string()),
        ("Medium".to_string(), "priority/medium".to_string()),
        ("Low".to_string(), "priority/low".to_string()),
        ("Lowest".to_string(), "priority/lowest".to_string()),
    ])
}

fn default_type_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Epic".to_string(), "type/epic".to_string()),
        ("Story".to_string(), "type/story".to_string()),
        ("Task".to_string(), "type/task".to_string()),
        ("Bug".to_string(), "type/bug".to_string()),
        ("Sub-task".to_string(), "type/subtask".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn env_with_url(url: &str) -> RawConfig {
        RawConfig {
            jira_url: Some(url.to_string()),
            jira_email: Some("env@example.com".to_string()),
            jira_api_token: Some("env-token".to_string()),
            ..RawConfig::default()
        }
    }

    #[test]
    fn defaults_apply_when_no_layer_sets_a_value() {
        let cfg = load_with_layers(None, None, None, RawConfig::default()).expect("config");
        assert_eq!(cfg.tickets_folder, "tickets");
        assert!(cfg.include_comments);
        assert_eq!(cfg.defaults.max_results, 50);
        assert_eq!(
            cfg.epic_link_fields,
            vec!["customfield_10014", "customfield_10008"]
        );
    }

    #[test]
    fn project_file_beats_global_file_beats_env() {
        let dir = tempdir().expect("temp dir");
        let global = dir.path().join("global.toml");
        let project = dir.path().join("project.toml");
        fs::write(
            &global,
            "jira_url = \"https://global.atlassian.net\"\ntickets_folder = \"global-tickets\"\n",
        )
        .expect("write global");
        fs::write(&project, "jira_url = \"https://project.atlassian.net\"\n")
            .expect("write project");

        let cfg = load_with_layers(
            None,
            Some(&project),
            Some(&global),
            env_with_url("https://env.atlassian.net"),
        )
        .expect("config");

        assert_eq!(cfg.jira_url, "https://project.atlassian.net");
        // global still wins over env for what the project file leaves unset
        assert_eq!(cfg.tickets_folder, "global-tickets");
        // env fills what no file sets
        assert_eq!(cfg.jira_email, "env@example.com");
    }

    #[test]
    fn explicit_file_beats_everything_and_must_exist() {
        let dir = tempdir().expect("temp dir");
        let explicit = dir.path().join("explicit.toml");
        fs::write(&explicit, "jira_url = \"https://explicit.atlassian.net\"\n").expect("write");

        let cfg = load_with_layers(
            Some(&explicit),
            None,
            None,
            env_with_url("https://env.atlassian.net"),
        )
        .expect("config");
        assert_eq!(cfg.jira_url, "https://explicit.atlassian.net");

        let missing = dir.path().join("nope.toml");
        let err = load_with_layers(Some(&missing), None, None, RawConfig::default())
            .expect_err("missing explicit file should fail");
        assert!(matches!(err, ConfigError::MissingConfigFile { .. }));
    }

    #[test]
    fn validate_credentials_lists_every_missing_value() {
        let cfg = load_with_layers(None, None, None, RawConfig::default()).expect("config");
        let err = cfg.validate_credentials().expect_err("should fail");
        match err {
            ConfigError::MissingCredentials { missing } => {
                assert_eq!(missing, vec!["JIRA_URL", "JIRA_EMAIL", "JIRA_API_TOKEN"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let cfg = load_with_layers(None, None, None, env_with_url("https://x.atlassian.net"))
            .expect("config");
        cfg.validate_credentials().expect("complete credentials");
    }

    #[test]
    fn tag_lookup_falls_back_to_slug() {
        let cfg = load_with_layers(None, None, None, RawConfig::default()).expect("config");
        assert_eq!(cfg.status_tag("In Progress"), "status/in-progress");
        assert_eq!(
            cfg.status_tag("Waiting For Review"),
            "status/waiting-for-review"
        );
        assert_eq!(cfg.priority_tag("High"), "priority/high");
        assert_eq!(cfg.type_tag("Tech Debt"), "type/tech-debt");
    }

    #[test]
    fn parses_tag_tables_saved_queries_and_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
jira_url = "https://example.atlassian.net"
jira_email = "you@example.com"
jira_api_token = "token"
vault_path = "/tmp/vault"

[status_tags]
"Blocked" = "status/stuck"

[saved_queries]
mine = "assignee = currentUser()"

[defaults]
project_key = "SR"
excluded_statuses = ["Done", "Closed"]
max_results = 25
"#,
        )
        .expect("write config");

        let cfg = load_with_layers(Some(&path), None, None, RawConfig::default()).expect("config");
        assert_eq!(cfg.status_tag("Blocked"), "status/stuck");
        assert_eq!(cfg.saved_query("mine"), Some("assignee = currentUser()"));
        assert_eq!(cfg.defaults.project_key.as_deref(), Some("SR"));
        assert_eq!(cfg.defaults.max_results, 25);
        assert_eq!(
            cfg.exclusion_clause().as_deref(),
            Some("status NOT IN (\"Done\", \"Closed\")")
        );
        assert_eq!(cfg.tickets_path(), PathBuf::from("/tmp/vault/tickets"));
    }

    #[test]
    fn user_config_path_prefers_xdg_config_home() {
        let path = user_config_path_from_env(
            Some(OsString::from("/tmp/xdg-home")),
            Some(OsString::from("/tmp/home")),
        )
        .expect("xdg path should resolve");
        assert_eq!(path, PathBuf::from("/tmp/xdg-home/jira-vault/config.toml"));

        let path = user_config_path_from_env(None, Some(OsString::from("/tmp/home")))
            .expect("home path should resolve");
        assert_eq!(
            path,
            PathBuf::from("/tmp/home/.config/jira-vault/config.toml")
        );

        assert!(user_config_path_from_env(None, None).is_none());
    }

    #[test]
    fn save_query_creates_and_extends_the_file() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");

        save_query(&path, "mine", "assignee = currentUser()").expect("save");
        save_query(&path, "hot", "priority = Highest").expect("save again");

        let cfg = load_with_layers(Some(&path), None, None, RawConfig::default()).expect("config");
        assert_eq!(cfg.saved_query("mine"), Some("assignee = currentUser()"));
        assert_eq!(cfg.saved_query("hot"), Some("priority = Highest"));
    }

    #[test]
    fn save_query_preserves_unrelated_settings() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "tickets_folder = \"notes\"\n").expect("write");

        save_query(&path, "mine", "assignee = currentUser()").expect("save");

        let cfg = load_with_layers(Some(&path), None, None, RawConfig::default()).expect("config");
        assert_eq!(cfg.tickets_folder, "notes");
        assert_eq!(cfg.saved_query("mine"), Some("assignee = currentUser()"));
    }

    #[test]
    fn config_example_parses() {
        let raw: RawConfig =
            toml::from_str(include_str!("../config.example.toml")).expect("example should parse");
        let cfg = finalize(raw);
        cfg.validate_credentials().expect("example is complete");
    }
}
