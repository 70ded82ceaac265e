use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use crate::config::{self, Config, ConfigError};
use crate::jira::{JiraClient, JiraError};
use crate::logging;
use crate::sync::{SyncError, Syncer};
use crate::ticket::{self, Ticket};

/// Mirror Jira tickets into a Markdown knowledge vault.
#[derive(Parser, Debug)]
#[command(name = "jira-vault", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to an explicit config file (overrides all other layers)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Path to a .env file loaded before config resolution
    #[arg(long, short = 'e', global = true)]
    pub env: Option<PathBuf>,

    /// Vault directory (overrides the configured vault_path)
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Display a single ticket as JSON
    #[command(name = "read:ticket")]
    ReadTicket {
        /// Ticket key (e.g., SR-1234)
        key: String,
    },

    /// Display multiple tickets as JSON
    #[command(name = "read:tickets")]
    ReadTickets {
        /// Ticket keys
        #[arg(required = true)]
        keys: Vec<String>,
        /// Show only key, status, summary, and labels
        #[arg(long)]
        list: bool,
    },

    /// Display ticket comments as JSON
    #[command(name = "read:comments")]
    ReadComments { key: String },

    /// Display available status transitions as JSON
    #[command(name = "read:transitions")]
    ReadTransitions { key: String },

    /// Display an epic and its children as JSON
    #[command(name = "read:epic")]
    ReadEpic {
        /// Epic key (e.g., EPIC-123)
        key: String,
        /// Show only key, status, and summary for children
        #[arg(long)]
        list: bool,
    },

    /// Display project tickets as JSON
    #[command(name = "read:project")]
    ReadProject(ReadProjectArgs),

    /// Execute a JQL query (or saved query) and display results as JSON
    #[command(name = "read:jql")]
    ReadJql(ReadJqlArgs),

    /// Sync a single ticket into the vault
    #[command(name = "sync:ticket")]
    SyncTicket {
        key: String,
        /// Category folder override
        #[arg(long)]
        category: Option<String>,
        /// Overwrite even if unchanged
        #[arg(long)]
        force: bool,
    },

    /// Sync multiple tickets into the vault
    #[command(name = "sync:tickets")]
    SyncTickets {
        #[arg(required = true)]
        keys: Vec<String>,
        #[arg(long)]
        category: Option<String>,
    },

    /// Sync an epic and all of its children
    #[command(name = "sync:epic")]
    SyncEpic {
        key: String,
        /// Skip the epic index file
        #[arg(long)]
        no_index: bool,
    },

    /// Sync all tickets matching a JQL query
    #[command(name = "sync:jql")]
    SyncJql {
        query: String,
        #[arg(long)]
        category: Option<String>,
        /// Index filename (default index.md)
        #[arg(long)]
        index_name: Option<String>,
        #[arg(long)]
        no_index: bool,
    },

    /// Sync a project's tickets
    #[command(name = "sync:project")]
    SyncProject {
        /// Project key; falls back to defaults.project_key
        key: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        issue_type: Option<String>,
        #[arg(long)]
        no_index: bool,
    },

    /// Transition a ticket to a new status
    #[command(name = "set:status")]
    SetStatus {
        key: String,
        /// Target status, transition name, or transition id
        status: String,
    },

    /// Assign a ticket ('none' unassigns)
    #[command(name = "set:assignee")]
    SetAssignee { key: String, assignee: String },

    /// Set ticket priority
    #[command(name = "set:priority")]
    SetPriority { key: String, priority: String },

    /// Replace a ticket's description
    #[command(name = "set:description")]
    SetDescription { key: String, description: String },

    /// Add a comment to a ticket
    #[command(name = "add:comment")]
    AddComment { key: String, body: String },

    /// Add a label to a ticket
    #[command(name = "add:label")]
    AddLabel { key: String, label: String },

    /// Link two tickets
    #[command(name = "add:link")]
    AddLink {
        from_key: String,
        to_key: String,
        /// Link type (Blocks, Relates, Duplicates, Clones)
        #[arg(long = "type", default_value = "Relates")]
        link_type: String,
    },

    /// Create a new ticket
    #[command(name = "create:ticket")]
    CreateTicket(CreateTicketArgs),

    /// Write config and .env templates (global by default)
    Init {
        /// Create project-specific config in the current directory
        #[arg(long)]
        project: bool,
    },

    /// Probe the connection and print server info
    Test,
}

#[derive(Args, Debug)]
pub struct ReadProjectArgs {
    /// Project key; falls back to defaults.project_key
    pub key: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long = "type")]
    pub issue_type: Option<String>,
    /// Filter by summary text
    #[arg(long)]
    pub title: Option<String>,
    /// Max results (defaults.max_results otherwise)
    #[arg(long)]
    pub limit: Option<usize>,
    /// Ignore the excluded-statuses list
    #[arg(long)]
    pub include_all: bool,
    /// Show only key, status, and summary
    #[arg(long)]
    pub list: bool,
    /// Filter by user ('me' = currentUser())
    #[arg(long)]
    pub user: Option<String>,
    /// Show tickets for all users
    #[arg(long)]
    pub all_users: bool,
}

#[derive(Args, Debug)]
pub struct ReadJqlArgs {
    /// JQL string or saved query name
    pub query: Option<String>,
    #[arg(long)]
    pub limit: Option<usize>,
    /// Ignore the excluded-statuses list
    #[arg(long)]
    pub include_all: bool,
    /// Show only key, status, summary, and labels
    #[arg(long)]
    pub list: bool,
    /// List saved queries and exit
    #[arg(long)]
    pub list_saved: bool,
    /// Save this query under a name for later use
    #[arg(long)]
    pub save: Option<String>,
    /// Filter by user ('me' = currentUser())
    #[arg(long)]
    pub user: Option<String>,
    /// Show tickets for all users
    #[arg(long)]
    pub all_users: bool,
}

#[derive(Args, Debug)]
pub struct CreateTicketArgs {
    /// Project key (e.g., SR)
    pub project: String,
    /// Ticket summary
    pub summary: String,
    /// Issue type
    #[arg(long = "type", default_value = "Task")]
    pub issue_type: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub assignee: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
    #[arg(long, num_args = 0..)]
    pub labels: Vec<String>,
    /// Parent epic key
    #[arg(long)]
    pub parent: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Jira(#[from] JiraError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("{0}")]
    Usage(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Dispatch a parsed invocation. `init` runs without configuration; every
/// other command resolves config, validates credentials, and builds one
/// client for the whole invocation.
pub fn run(cli: Cli) -> Result<(), AppError> {
    if cli.verbose {
        logging::set_verbose(true);
    }

    if let Commands::Init { project } = &cli.command {
        return handle_init(*project);
    }

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(vault) = &cli.vault {
        config.vault_path = vault.clone();
    }
    config.validate_credentials()?;

    let client = JiraClient::new(&config.jira_url, &config.jira_email, &config.jira_api_token)?;
    let syncer = Syncer::new(&client, &config);

    match cli.command {
        Commands::ReadTicket { key } => {
            let ticket = syncer.fetch_ticket(&key)?;
            print_json(&ticket)
        }
        Commands::ReadTickets { keys, list } => handle_read_tickets(&client, &config, &keys, list),
        Commands::ReadComments { key } => {
            let comments: Vec<_> = client
                .get_comments(&key)?
                .iter()
                .map(ticket::normalize_comment)
                .collect();
            print_json(&comments)
        }
        Commands::ReadTransitions { key } => {
            let current = syncer.fetch_ticket(&key)?;
            let transitions = client.get_transitions(&key)?;
            print_json(&json!({
                "key": key,
                "current_status": current.status,
                "transitions": transitions,
            }))
        }
        Commands::ReadEpic { key, list } => {
            let (epic, children) = syncer.fetch_epic(&key)?;
            let children_json = if list {
                serde_json::to_value(children.iter().map(summary_row).collect::<Vec<_>>())?
            } else {
                serde_json::to_value(&children)?
            };
            print_json(&json!({"epic": epic, "children": children_json}))
        }
        Commands::ReadProject(args) => handle_read_project(&client, &config, &args),
        Commands::ReadJql(args) => handle_read_jql(&client, &config, &args, cli.config.as_deref()),
        Commands::SyncTicket {
            key,
            category,
            force,
        } => print_json(&syncer.sync_ticket(&key, category.as_deref(), force)),
        Commands::SyncTickets { keys, category } => {
            print_json(&syncer.sync_tickets(&keys, category.as_deref()))
        }
        Commands::SyncEpic { key, no_index } => print_json(&syncer.sync_epic(&key, !no_index)?),
        Commands::SyncJql {
            query,
            category,
            index_name,
            no_index,
        } => {
            let jql = config
                .saved_query(&query)
                .map(ToString::to_string)
                .unwrap_or(query);
            print_json(&syncer.sync_jql(
                &jql,
                category.as_deref(),
                !no_index,
                index_name.as_deref(),
            )?)
        }
        Commands::SyncProject {
            key,
            status,
            issue_type,
            no_index,
        } => {
            let key = resolve_project_key(&config, key)?;
            print_json(&syncer.sync_project(
                &key,
                status.as_deref(),
                issue_type.as_deref(),
                None,
                !no_index,
            )?)
        }
        Commands::SetStatus { key, status } => {
            let applied = client.update_status(&key, &status)?;
            print_json(&json!({
                "success": true,
                "key": key,
                "status": status,
                "transition_id": applied.id,
                "transition": applied.name,
            }))
        }
        Commands::SetAssignee { key, assignee } => {
            let resolved = if assignee.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(assignee.as_str())
            };
            client.assign(&key, resolved)?;
            print_json(&json!({"success": true, "key": key, "assignee": resolved}))
        }
        Commands::SetPriority { key, priority } => {
            client.update_fields(&key, json!({"priority": {"name": priority}}))?;
            print_json(&json!({"success": true, "key": key, "priority": priority}))
        }
        Commands::SetDescription { key, description } => {
            client.update_description(&key, &description)?;
            print_json(&json!({"success": true, "key": key}))
        }
        Commands::AddComment { key, body } => {
            let comment_id = client.add_comment(&key, &body)?;
            print_json(&json!({"success": true, "key": key, "comment_id": comment_id}))
        }
        Commands::AddLabel { key, label } => {
            let issue = client.get_issue(&key, None)?;
            let mut labels = issue.fields.labels;
            if !labels.contains(&label) {
                labels.push(label);
                client.update_fields(&key, json!({"labels": labels}))?;
            }
            print_json(&json!({"success": true, "key": key, "labels": labels}))
        }
        Commands::AddLink {
            from_key,
            to_key,
            link_type,
        } => {
            client.link_tickets(&from_key, &to_key, &link_type)?;
            print_json(&json!({
                "success": true,
                "from": from_key,
                "to": to_key,
                "type": link_type,
            }))
        }
        Commands::CreateTicket(args) => handle_create_ticket(&client, &args),
        Commands::Test => handle_test(&client),
        Commands::Init { .. } => unreachable!("handled before config loading"),
    }
}

fn handle_read_tickets(
    client: &JiraClient,
    config: &Config,
    keys: &[String],
    list: bool,
) -> Result<(), AppError> {
    let jql = format!("key in ({})", keys.join(","));
    let raws = client.search_page(&jql, keys.len().max(1), 0)?;
    let tickets = ticket::normalize_all(
        &raws,
        client.base_url(),
        &config.epic_link_fields,
        &config.epic_name_fields,
    );

    // return in the order the keys were given; unknown keys are skipped
    let by_key: BTreeMap<&str, &Ticket> =
        tickets.iter().map(|t| (t.key.as_str(), t)).collect();
    let ordered: Vec<&Ticket> = keys
        .iter()
        .filter_map(|k| by_key.get(k.as_str()).copied())
        .collect();

    if list {
        let rows: Vec<_> = ordered.iter().copied().map(summary_row).collect();
        print_json(&rows)
    } else {
        print_json(&ordered)
    }
}

fn handle_read_project(
    client: &JiraClient,
    config: &Config,
    args: &ReadProjectArgs,
) -> Result<(), AppError> {
    let key = resolve_project_key(config, args.key.clone())?;
    let assignee = resolve_user_filter(
        args.user.as_deref(),
        args.all_users,
        config.defaults.user.as_deref(),
    );

    let mut parts = vec![format!("project = {key}")];
    if let Some(status) = &args.status {
        parts.push(format!("status = \"{status}\""));
    }
    if let Some(issue_type) = &args.issue_type {
        parts.push(format!("issuetype = \"{issue_type}\""));
    }
    if let Some(title) = &args.title {
        parts.push(format!("summary ~ \"{title}\""));
    }
    if let Some(user) = &assignee {
        parts.push(assignee_clause(user));
    }
    if !args.include_all {
        if let Some(clause) = config.exclusion_clause() {
            parts.push(clause);
        }
    }
    let jql = format!("{} ORDER BY created DESC", parts.join(" AND "));
    logging::debug(format!("executing: {jql}"));

    let limit = args.limit.unwrap_or(config.defaults.max_results);
    let raws = client.search_page(&jql, limit, 0)?;
    let tickets = ticket::normalize_all(
        &raws,
        client.base_url(),
        &config.epic_link_fields,
        &config.epic_name_fields,
    );

    if args.list {
        let rows: Vec<_> = tickets.iter().map(summary_row).collect();
        print_json(&rows)
    } else {
        print_json(&tickets)
    }
}

fn handle_read_jql(
    client: &JiraClient,
    config: &Config,
    args: &ReadJqlArgs,
    explicit_config: Option<&std::path::Path>,
) -> Result<(), AppError> {
    if args.list_saved {
        if config.saved_queries.is_empty() {
            println!("No saved queries found.");
        } else {
            for (name, jql) in &config.saved_queries {
                println!("{name}: {jql}");
            }
        }
        return Ok(());
    }

    let Some(query) = &args.query else {
        return Err(AppError::Usage(
            "query is required (or use --list-saved)".to_string(),
        ));
    };
    let mut jql = config
        .saved_query(query)
        .map(ToString::to_string)
        .unwrap_or_else(|| query.clone());

    // persist before exclusion/user clauses are appended
    if let Some(name) = &args.save {
        let path = explicit_config
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(config::PROJECT_CONFIG_FILE));
        config::save_query(&path, name, &jql)?;
        logging::info(format!("saved query '{name}' to {}", path.display()));
    }

    let assignee = resolve_user_filter(
        args.user.as_deref(),
        args.all_users,
        config.defaults.user.as_deref(),
    );
    if let Some(user) = &assignee {
        jql = format!("({jql}) AND {}", assignee_clause(user));
    }
    if !args.include_all {
        if let Some(clause) = config.exclusion_clause() {
            jql = format!("({jql}) AND {clause}");
        }
    }
    logging::debug(format!("executing: {jql}"));

    let limit = args.limit.unwrap_or(config.defaults.max_results);
    let raws = client.search_page(&jql, limit, 0)?;
    let tickets = ticket::normalize_all(
        &raws,
        client.base_url(),
        &config.epic_link_fields,
        &config.epic_name_fields,
    );

    if args.list {
        let rows: Vec<_> = tickets.iter().map(summary_row).collect();
        print_json(&rows)
    } else {
        print_json(&tickets)
    }
}

fn handle_create_ticket(client: &JiraClient, args: &CreateTicketArgs) -> Result<(), AppError> {
    let mut fields = serde_json::Map::new();
    fields.insert("project".to_string(), json!({"key": args.project}));
    fields.insert("summary".to_string(), json!(args.summary));
    fields.insert("issuetype".to_string(), json!({"name": args.issue_type}));
    if let Some(description) = &args.description {
        fields.insert("description".to_string(), json!(description));
    }
    if let Some(assignee) = &args.assignee {
        fields.insert("assignee".to_string(), json!({"name": assignee}));
    }
    if let Some(priority) = &args.priority {
        fields.insert("priority".to_string(), json!({"name": priority}));
    }
    if !args.labels.is_empty() {
        fields.insert("labels".to_string(), json!(args.labels));
    }
    if let Some(parent) = &args.parent {
        fields.insert("parent".to_string(), json!({"key": parent}));
    }

    let key = client.create_issue(serde_json::Value::Object(fields))?;
    print_json(&json!({
        "success": true,
        "key": key,
        "url": client.browse_url(&key),
        "summary": args.summary,
    }))
}

fn handle_test(client: &JiraClient) -> Result<(), AppError> {
    match client.server_info() {
        Ok(info) => print_json(&json!({
            "success": true,
            "server": info.base_url,
            "version": info.version,
            "deployment_type": info.deployment_type,
        })),
        Err(err) => print_json(&json!({
            "success": false,
            "error": err.to_string(),
        })),
    }
}

const CONFIG_TEMPLATE: &str = r#"# jira-vault configuration
# Credentials usually live in the .env file next to this one.

# vault_path = "/path/to/your/vault"
tickets_folder = "tickets"

include_comments = true
include_attachments = true
include_links = true

[defaults]
# project_key = "SR"
# excluded_statuses = ["Done", "Closed"]
max_results = 50
"#;

const ENV_TEMPLATE: &str = "# Jira API configuration
JIRA_URL=https://your-domain.atlassian.net
JIRA_EMAIL=your-email@example.com
JIRA_API_TOKEN=your-api-token
";

fn handle_init(project: bool) -> Result<(), AppError> {
    let (config_path, env_path, scope) = if project {
        (
            PathBuf::from(config::PROJECT_CONFIG_FILE),
            PathBuf::from(".env"),
            "project",
        )
    } else {
        let config_path = config::user_config_path().ok_or(ConfigError::MissingHomeDirectory)?;
        let env_path = config_path.with_file_name(".env");
        (config_path, env_path, "global")
    };

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| AppError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    write_template(&config_path, CONFIG_TEMPLATE)?;
    write_template(&env_path, ENV_TEMPLATE)?;

    println!("\nInitialized {scope} jira-vault config.");
    println!("Edit {} with your Jira credentials to get started.", env_path.display());
    Ok(())
}

fn write_template(path: &std::path::Path, content: &str) -> Result<(), AppError> {
    if path.exists() {
        println!("{} already exists, leaving it alone", path.display());
        return Ok(());
    }
    fs::write(path, content).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    println!("Created {}", path.display());
    Ok(())
}

fn resolve_project_key(config: &Config, key: Option<String>) -> Result<String, AppError> {
    key.or_else(|| config.defaults.project_key.clone())
        .ok_or_else(|| {
            AppError::Usage(
                "no project key given and defaults.project_key is not configured".to_string(),
            )
        })
}

/// User filter resolution: `--all-users` disables the filter, an explicit
/// `--user` wins ('me'/'current' alias to currentUser()), the configured
/// default applies otherwise, and currentUser() is the final fallback.
fn resolve_user_filter(
    user: Option<&str>,
    all_users: bool,
    config_default: Option<&str>,
) -> Option<String> {
    if all_users {
        return None;
    }
    let alias = |value: &str| {
        let lower = value.trim().to_lowercase();
        if lower == "me" || lower == "current" {
            "currentUser()".to_string()
        } else {
            value.trim().to_string()
        }
    };
    if let Some(value) = user {
        return Some(alias(value));
    }
    Some(
        config_default
            .map(alias)
            .unwrap_or_else(|| "currentUser()".to_string()),
    )
}

fn assignee_clause(user: &str) -> String {
    if user == "currentUser()" {
        "assignee = currentUser()".to_string()
    } else {
        format!("assignee = \"{user}\"")
    }
}

fn summary_row(ticket: &Ticket) -> serde_json::Value {
    json!({
        "key": ticket.key,
        "status": ticket.status,
        "summary": ticket.summary,
        "labels": ticket.labels,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
