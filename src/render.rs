use chrono::Local;

use crate::config::Config;
use crate::markup::{format_size, jira_to_markdown, sanitize_name};
use crate::ticket::{LinkDirection, Ticket};

const FILENAME_SLUG_LEN: usize = 50;
const CATEGORY_NAME_LEN: usize = 30;

/// Rendering output: the file to write, its content, and the category folder
/// it belongs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedDocument {
    pub filename: String,
    pub content: String,
    pub category: String,
}

/// Render one ticket as a Markdown note. `category` overrides the derived
/// category folder when given.
pub fn render_ticket(ticket: &Ticket, config: &Config, category: Option<&str>) -> FormattedDocument {
    let category = category
        .map(ToString::to_string)
        .unwrap_or_else(|| detect_category(ticket));

    let mut lines: Vec<String> = Vec::new();
    build_front_matter(ticket, &mut lines);

    lines.push(format!("# {}: {}", ticket.key, ticket.summary));
    lines.push(String::new());

    let tags = build_tags(ticket, config);
    if !tags.is_empty() {
        lines.push(tags.join(" "));
        lines.push(String::new());
    }

    if !ticket.description.is_empty() {
        lines.push("## Description".to_string());
        lines.push(String::new());
        lines.push(jira_to_markdown(&ticket.description));
        lines.push(String::new());
    }

    if config.include_links && has_relations(ticket) {
        build_links_section(ticket, &mut lines);
    }
    if config.include_comments && !ticket.comments.is_empty() {
        build_comments_section(ticket, &mut lines);
    }
    if config.include_attachments && !ticket.attachments.is_empty() {
        build_attachments_section(ticket, &mut lines);
    }

    FormattedDocument {
        filename: ticket_filename(ticket),
        content: lines.join("\n"),
        category,
    }
}

/// Render a list/index document: summary statistics, a ticket table,
/// category-grouped sections, and quick links.
pub fn render_ticket_list(tickets: &[Ticket], title: &str, _config: &Config) -> String {
    let mut lines: Vec<String> = vec![format!("# {title}"), String::new()];

    lines.push("## Summary".to_string());
    lines.push(format!("- **Total tickets:** {}", tickets.len()));

    if !tickets.is_empty() {
        let statuses = distinct_sorted(tickets.iter().map(|t| t.status.as_str()));
        let priorities = distinct_sorted(tickets.iter().map(|t| t.priority.as_str()));
        let types = distinct_sorted(tickets.iter().map(|t| t.issue_type.as_str()));

        if !statuses.is_empty() {
            lines.push(format!("- **Statuses:** {}", statuses.join(", ")));
        }
        if !priorities.is_empty() {
            lines.push(format!("- **Priorities:** {}", priorities.join(", ")));
        }
        if !types.is_empty() {
            lines.push(format!("- **Types:** {}", types.join(", ")));
        }
    }
    lines.push(String::new());

    if !tickets.is_empty() {
        lines.push("## Ticket List".to_string());
        lines.push(String::new());
        lines.push("| Key | Summary | Status | Priority | Type |".to_string());
        lines.push("|-----|---------|--------|----------|------|".to_string());
        for ticket in tickets {
            lines.push(format!(
                "| {} | {} | {} | {} | {} |",
                ticket.key, ticket.summary, ticket.status, ticket.priority, ticket.issue_type
            ));
        }
        lines.push(String::new());

        build_category_sections(tickets, &mut lines);

        lines.push("## Quick Links".to_string());
        lines.push(String::new());
        for ticket in tickets.iter().take(5) {
            lines.push(format!("- [[{}]] - {}", ticket.key, ticket.summary));
        }
    }

    lines.join("\n")
}

/// `{key}-{slug}.md`, or bare `{key}.md` when the summary yields no slug.
/// Pure in `key` and `summary` — nothing time-dependent leaks in.
pub fn ticket_filename(ticket: &Ticket) -> String {
    let slug = sanitize_name(&ticket.summary, FILENAME_SLUG_LEN, true);
    if slug.is_empty() {
        return format!("{}.md", ticket.key);
    }
    format!("{}-{}.md", ticket.key, slug)
}

/// Category folder: parent summary, else epic name, else issue type, else
/// "General".
pub fn detect_category(ticket: &Ticket) -> String {
    if !ticket.parent_summary.is_empty() {
        let name = sanitize_name(&ticket.parent_summary, CATEGORY_NAME_LEN, false);
        if !name.is_empty() {
            return name;
        }
    }
    if !ticket.epic_name.is_empty() {
        let name = sanitize_name(&ticket.epic_name, CATEGORY_NAME_LEN, false);
        if !name.is_empty() {
            return name;
        }
    }
    if !ticket.issue_type.is_empty() {
        return ticket.issue_type.clone();
    }
    "General".to_string()
}

// Fixed key order; optional keys only when present. Diffs between two syncs
// of the same ticket must stay minimal, so the order never depends on which
// fields happen to be set.
fn build_front_matter(ticket: &Ticket, lines: &mut Vec<String>) {
    lines.push("---".to_string());
    lines.push(format!("key: {}", ticket.key));
    lines.push(format!("url: {}", ticket.url));
    lines.push(format!("status: {}", ticket.status));
    lines.push(format!("priority: {}", ticket.priority));
    lines.push(format!("type: {}", ticket.issue_type));

    if !ticket.assignee.is_empty() {
        lines.push(format!("assignee: {}", ticket.assignee));
    }
    if !ticket.reporter.is_empty() {
        lines.push(format!("reporter: {}", ticket.reporter));
    }
    if let Some(created) = ticket.created {
        lines.push(format!("created: {}", created.format("%Y-%m-%d")));
    }
    if let Some(updated) = ticket.updated {
        lines.push(format!("updated: {}", updated.format("%Y-%m-%d")));
    }
    if !ticket.parent_key.is_empty() {
        lines.push(format!("parent: {}", ticket.parent_key));
    }
    if !ticket.epic_key.is_empty() {
        lines.push(format!("epic: {}", ticket.epic_key));
    }
    if !ticket.labels.is_empty() {
        lines.push(format!("labels: [{}]", ticket.labels.join(", ")));
    }

    lines.push(format!(
        "synced: {}",
        Local::now().format("%Y-%m-%d %H:%M")
    ));
    lines.push("---".to_string());
    lines.push(String::new());
}

fn build_tags(ticket: &Ticket, config: &Config) -> Vec<String> {
    let mut tags = Vec::new();
    if !ticket.status.is_empty() {
        tags.push(format!("#{}", config.status_tag(&ticket.status)));
    }
    if !ticket.priority.is_empty() {
        tags.push(format!("#{}", config.priority_tag(&ticket.priority)));
    }
    if !ticket.issue_type.is_empty() {
        tags.push(format!("#{}", config.type_tag(&ticket.issue_type)));
    }
    for label in &ticket.labels {
        tags.push(format!("#label/{}", label.to_lowercase().replace(' ', "-")));
    }
    tags
}

fn has_relations(ticket: &Ticket) -> bool {
    !ticket.parent_key.is_empty()
        || !ticket.epic_key.is_empty()
        || !ticket.links.is_empty()
        || !ticket.subtasks.is_empty()
}

fn build_links_section(ticket: &Ticket, lines: &mut Vec<String>) {
    lines.push("## Related Tickets".to_string());
    lines.push(String::new());

    if !ticket.parent_key.is_empty() {
        lines.push(format!(
            "**Parent:** [[{}]] - {}",
            ticket.parent_key, ticket.parent_summary
        ));
        lines.push(String::new());
    }
    if !ticket.epic_key.is_empty() && ticket.epic_key != ticket.parent_key {
        lines.push(format!("**Epic:** [[{}]]", ticket.epic_key));
        lines.push(String::new());
    }

    if !ticket.links.is_empty() {
        lines.push("### Links".to_string());
        for link in &ticket.links {
            match link.direction {
                LinkDirection::Outward => lines.push(format!(
                    "- {}: [[{}]] - {}",
                    link.link_type, link.key, link.summary
                )),
                LinkDirection::Inward => lines.push(format!(
                    "- {} (inward): [[{}]] - {}",
                    link.link_type, link.key, link.summary
                )),
            }
        }
        lines.push(String::new());
    }

    if !ticket.subtasks.is_empty() {
        lines.push("### Subtasks".to_string());
        for subtask in &ticket.subtasks {
            lines.push(format!("- [[{subtask}]]"));
        }
        lines.push(String::new());
    }
}

fn build_comments_section(ticket: &Ticket, lines: &mut Vec<String>) {
    lines.push("## Comments".to_string());
    lines.push(String::new());

    for comment in &ticket.comments {
        let author = if comment.author.is_empty() {
            "Unknown"
        } else {
            &comment.author
        };
        match comment.created {
            Some(created) => lines.push(format!(
                "### {} - {}",
                author,
                created.format("%Y-%m-%d %H:%M")
            )),
            None => lines.push(format!("### {author}")),
        }
        lines.push(String::new());
        // fenced so hostile markup in ticket text cannot restructure the note
        lines.push("```md".to_string());
        lines.push(jira_to_markdown(&comment.body));
        lines.push("```".to_string());
        lines.push(String::new());
    }
}

fn build_attachments_section(ticket: &Ticket, lines: &mut Vec<String>) {
    lines.push("## Attachments".to_string());
    lines.push(String::new());
    for attachment in &ticket.attachments {
        lines.push(format!(
            "- [{}]({}) ({})",
            attachment.filename,
            attachment.url,
            format_size(attachment.size)
        ));
    }
    lines.push(String::new());
}

fn build_category_sections(tickets: &[Ticket], lines: &mut Vec<String>) {
    use std::collections::BTreeMap;

    let mut categories: BTreeMap<String, Vec<&Ticket>> = BTreeMap::new();
    for ticket in tickets {
        categories.entry(detect_category(ticket)).or_default().push(ticket);
    }

    lines.push("## By Category".to_string());
    lines.push(String::new());
    for (category, grouped) in &categories {
        lines.push(format!("### {category}"));
        for ticket in grouped {
            lines.push(format!("- {} - {}", ticket.key, ticket.summary));
        }
        lines.push(String::new());
    }
}

fn distinct_sorted<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut distinct: Vec<&str> = values.filter(|v| !v.is_empty()).collect();
    distinct.sort_unstable();
    distinct.dedup();
    distinct
}
