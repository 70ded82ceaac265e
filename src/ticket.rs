use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use crate::jira::{NameField, RawFields, RawIssue, UserField};

/// Canonical ticket record. Every optional string defaults to `""` and every
/// sequence to empty, so rendering code never distinguishes "absent" from
/// "not set". `key` is never empty.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Ticket {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub issue_type: String,
    pub assignee: String,
    pub reporter: String,
    pub created: Option<NaiveDateTime>,
    pub updated: Option<NaiveDateTime>,
    pub resolved: Option<NaiveDateTime>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    pub fix_versions: Vec<String>,
    pub parent_key: String,
    pub parent_summary: String,
    pub epic_key: String,
    pub epic_name: String,
    pub subtasks: Vec<String>,
    pub links: Vec<TicketLink>,
    pub comments: Vec<TicketComment>,
    pub attachments: Vec<TicketAttachment>,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    Inward,
    Outward,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TicketLink {
    pub direction: LinkDirection,
    pub link_type: String,
    pub key: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TicketComment {
    pub author: String,
    pub body: String,
    pub created: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TicketAttachment {
    pub filename: String,
    pub url: String,
    pub size: u64,
    pub mime_type: String,
}

/// Map a raw API payload into the canonical record. Pure; missing nested
/// objects degrade to empty values. `epic_link_fields` / `epic_name_fields`
/// are the instance-specific custom-field candidates, probed in order with
/// the `parent` field as the final fallback for the link.
pub fn normalize(
    raw: &RawIssue,
    base_url: &str,
    epic_link_fields: &[String],
    epic_name_fields: &[String],
) -> Ticket {
    let fields = &raw.fields;

    let mut epic_key = first_custom_key(fields, epic_link_fields);
    if epic_key.is_empty() {
        if let Some(parent) = &fields.parent {
            epic_key = parent.key.clone();
        }
    }

    Ticket {
        key: raw.key.clone(),
        summary: fields.summary.clone().unwrap_or_default(),
        description: flatten_body(fields.description.as_ref()),
        status: name_of(&fields.status),
        priority: name_of(&fields.priority),
        issue_type: name_of(&fields.issuetype),
        assignee: user_of(&fields.assignee),
        reporter: user_of(&fields.reporter),
        created: parse_timestamp(fields.created.as_deref()),
        updated: parse_timestamp(fields.updated.as_deref()),
        resolved: parse_timestamp(fields.resolution_date.as_deref()),
        labels: fields.labels.clone(),
        components: names_of(&fields.components),
        fix_versions: names_of(&fields.fix_versions),
        parent_key: fields
            .parent
            .as_ref()
            .map(|p| p.key.clone())
            .unwrap_or_default(),
        parent_summary: fields
            .parent
            .as_ref()
            .and_then(|p| p.fields.summary.clone())
            .unwrap_or_default(),
        epic_key,
        epic_name: first_custom_key(fields, epic_name_fields),
        subtasks: fields.subtasks.iter().map(|s| s.key.clone()).collect(),
        links: split_links(fields),
        comments: fields
            .comment
            .as_ref()
            .map(|container| {
                container
                    .comments
                    .iter()
                    .map(|c| TicketComment {
                        author: user_of(&c.author),
                        body: flatten_body(c.body.as_ref()),
                        created: parse_timestamp(c.created.as_deref()),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        attachments: fields
            .attachment
            .iter()
            .map(|a| TicketAttachment {
                filename: a.filename.clone().unwrap_or_default(),
                url: a.content.clone().unwrap_or_default(),
                size: a.size.unwrap_or(0),
                mime_type: a.mime_type.clone().unwrap_or_default(),
            })
            .collect(),
        url: format!("{}/browse/{}", base_url.trim_end_matches('/'), raw.key),
    }
}

/// Normalize a batch of raw issues, preserving order.
pub fn normalize_all(
    raw_issues: &[RawIssue],
    base_url: &str,
    epic_link_fields: &[String],
    epic_name_fields: &[String],
) -> Vec<Ticket> {
    raw_issues
        .iter()
        .map(|raw| normalize(raw, base_url, epic_link_fields, epic_name_fields))
        .collect()
}

/// Normalize a standalone comment payload (the `read:comments` path).
pub fn normalize_comment(raw: &crate::jira::RawComment) -> TicketComment {
    TicketComment {
        author: user_of(&raw.author),
        body: flatten_body(raw.body.as_ref()),
        created: parse_timestamp(raw.created.as_deref()),
    }
}

fn name_of(field: &Option<NameField>) -> String {
    field
        .as_ref()
        .and_then(|f| f.name.clone())
        .unwrap_or_default()
}

fn names_of(fields: &[NameField]) -> Vec<String> {
    fields.iter().filter_map(|f| f.name.clone()).collect()
}

fn user_of(field: &Option<UserField>) -> String {
    field
        .as_ref()
        .and_then(|user| {
            user.display_name
                .clone()
                .or_else(|| user.name.clone())
                .or_else(|| user.email_address.clone())
        })
        .unwrap_or_default()
}

/// First non-empty hit over the ordered custom-field candidates. A candidate
/// may hold a bare string or an object carrying a `key`.
fn first_custom_key(fields: &RawFields, candidates: &[String]) -> String {
    for name in candidates {
        let Some(value) = fields.custom.get(name) else {
            continue;
        };
        match value {
            Value::String(s) if !s.trim().is_empty() => return s.trim().to_string(),
            Value::Object(map) => {
                if let Some(Value::String(key)) = map.get("key") {
                    if !key.trim().is_empty() {
                        return key.trim().to_string();
                    }
                }
            }
            _ => {}
        }
    }
    String::new()
}

fn split_links(fields: &RawFields) -> Vec<TicketLink> {
    let mut links = Vec::new();
    for link in &fields.issue_links {
        let link_type = name_of(&link.link_type);
        if let Some(issue) = &link.outward_issue {
            links.push(TicketLink {
                direction: LinkDirection::Outward,
                link_type,
                key: issue.key.clone(),
                summary: issue.fields.summary.clone().unwrap_or_default(),
            });
        } else if let Some(issue) = &link.inward_issue {
            links.push(TicketLink {
                direction: LinkDirection::Inward,
                link_type,
                key: issue.key.clone(),
                summary: issue.fields.summary.clone().unwrap_or_default(),
            });
        }
        // links with neither side are dropped
    }
    links
}

/// Parse the vendor timestamp format (`2024-01-15T10:30:00.000+0000`) to a
/// naive local timestamp: sub-second and timezone suffixes are stripped
/// before parsing. Absent or unparsable input is `None`.
pub fn parse_timestamp(raw: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw?.trim();
    let clean = raw.split('.').next().unwrap_or(raw);
    let clean = if clean.len() > 19 { &clean[..19] } else { clean };
    NaiveDateTime::parse_from_str(clean, "%Y-%m-%dT%H:%M:%S").ok()
}

/// Flatten a description/comment body. Plain strings pass through; the
/// structured document format flattens to its text nodes so a v3-shaped
/// payload degrades to readable text instead of failing.
fn flatten_body(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => {
            let mut out = String::new();
            collect_text(other, &mut out);
            out.trim_end().to_string()
        }
    }
}

fn collect_text(node: &Value, out: &mut String) {
    match node {
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
                return;
            }
            if let Some(node_type) = map.get("type").and_then(Value::as_str) {
                if node_type == "hardBreak" {
                    out.push('\n');
                    return;
                }
                if let Some(content) = map.get("content") {
                    collect_text(content, out);
                    if matches!(node_type, "paragraph" | "heading" | "blockquote" | "listItem") {
                        out.push('\n');
                    }
                }
                return;
            }
            if let Some(content) = map.get("content") {
                collect_text(content, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn epic_link_fields() -> Vec<String> {
        vec![
            "customfield_10014".to_string(),
            "customfield_10008".to_string(),
        ]
    }

    fn epic_name_fields() -> Vec<String> {
        vec!["customfield_10011".to_string()]
    }

    fn normalize_value(payload: Value) -> Ticket {
        let raw: RawIssue = serde_json::from_value(payload).expect("payload should deserialize");
        normalize(
            &raw,
            "https://example.atlassian.net",
            &epic_link_fields(),
            &epic_name_fields(),
        )
    }

    #[test]
    fn bare_issue_normalizes_to_empty_defaults() {
        let ticket = normalize_value(json!({"key": "SR-1"}));

        assert_eq!(ticket.key, "SR-1");
        assert_eq!(ticket.summary, "");
        assert_eq!(ticket.status, "");
        assert_eq!(ticket.assignee, "");
        assert_eq!(ticket.created, None);
        assert!(ticket.labels.is_empty());
        assert!(ticket.links.is_empty());
        assert_eq!(ticket.parent_key, "");
        assert_eq!(ticket.epic_key, "");
        assert_eq!(ticket.url, "https://example.atlassian.net/browse/SR-1");
    }

    #[test]
    fn maps_every_populated_field() {
        let ticket = normalize_value(json!({
            "key": "SR-42",
            "fields": {
                "summary": "Fix login flow",
                "description": "h1. Steps\nlog in",
                "status": {"name": "In Progress"},
                "priority": {"name": "High"},
                "issuetype": {"name": "Bug"},
                "assignee": {"displayName": "Ada Lovelace"},
                "reporter": {"displayName": "Grace Hopper"},
                "created": "2024-01-15T10:30:00.000+0000",
                "updated": "2024-02-01T08:00:00.000+0000",
                "resolutiondate": null,
                "labels": ["auth", "regression"],
                "components": [{"name": "web"}, {"name": "api"}],
                "fixVersions": [{"name": "1.4"}],
                "parent": {"key": "SR-40", "fields": {"summary": "Login Epic Phase"}},
                "subtasks": [{"key": "SR-43"}, {"key": "SR-44"}],
                "issuelinks": [
                    {"type": {"name": "Blocks"}, "outwardIssue": {"key": "SR-50", "fields": {"summary": "Deploy"}}},
                    {"type": {"name": "Relates"}, "inwardIssue": {"key": "SR-51", "fields": {"summary": "Docs"}}}
                ],
                "comment": {"comments": [
                    {"author": {"displayName": "Bob"}, "body": "On it", "created": "2024-01-16T09:00:00.000+0000"}
                ]},
                "attachment": [
                    {"filename": "trace.log", "content": "https://example.atlassian.net/att/1", "size": 2048, "mimeType": "text/plain"}
                ],
                "customfield_10011": "Login Epic"
            }
        }));

        assert_eq!(ticket.summary, "Fix login flow");
        assert_eq!(ticket.status, "In Progress");
        assert_eq!(ticket.issue_type, "Bug");
        assert_eq!(ticket.assignee, "Ada Lovelace");
        assert_eq!(
            ticket.created,
            parse_timestamp(Some("2024-01-15T10:30:00.000+0000"))
        );
        assert_eq!(ticket.resolved, None);
        assert_eq!(ticket.labels, vec!["auth", "regression"]);
        assert_eq!(ticket.components, vec!["web", "api"]);
        assert_eq!(ticket.fix_versions, vec!["1.4"]);
        assert_eq!(ticket.parent_key, "SR-40");
        assert_eq!(ticket.parent_summary, "Login Epic Phase");
        assert_eq!(ticket.subtasks, vec!["SR-43", "SR-44"]);
        assert_eq!(ticket.epic_name, "Login Epic");
        assert_eq!(ticket.links.len(), 2);
        assert_eq!(ticket.links[0].direction, LinkDirection::Outward);
        assert_eq!(ticket.links[0].key, "SR-50");
        assert_eq!(ticket.links[1].direction, LinkDirection::Inward);
        assert_eq!(ticket.links[1].link_type, "Relates");
        assert_eq!(ticket.comments.len(), 1);
        assert_eq!(ticket.comments[0].author, "Bob");
        assert_eq!(ticket.attachments[0].filename, "trace.log");
        assert_eq!(ticket.attachments[0].size, 2048);
    }

    #[test]
    fn epic_link_takes_first_non_empty_candidate() {
        let ticket = normalize_value(json!({
            "key": "SR-1",
            "fields": {
                "customfield_10014": "",
                "customfield_10008": "EPIC-7"
            }
        }));
        assert_eq!(ticket.epic_key, "EPIC-7");

        let ticket = normalize_value(json!({
            "key": "SR-1",
            "fields": {
                "customfield_10014": {"key": "EPIC-3"},
                "customfield_10008": "EPIC-7"
            }
        }));
        assert_eq!(ticket.epic_key, "EPIC-3");
    }

    #[test]
    fn epic_link_falls_back_to_parent() {
        let ticket = normalize_value(json!({
            "key": "SR-1",
            "fields": {
                "parent": {"key": "EPIC-9", "fields": {"summary": "Next-gen epic"}}
            }
        }));
        assert_eq!(ticket.epic_key, "EPIC-9");
        assert_eq!(ticket.parent_key, "EPIC-9");
    }

    #[test]
    fn links_without_either_side_are_dropped() {
        let ticket = normalize_value(json!({
            "key": "SR-1",
            "fields": {
                "issuelinks": [
                    {"type": {"name": "Blocks"}},
                    {"type": {"name": "Relates"}, "inwardIssue": {"key": "SR-2"}}
                ]
            }
        }));
        assert_eq!(ticket.links.len(), 1);
        assert_eq!(ticket.links[0].key, "SR-2");
    }

    #[test]
    fn parses_vendor_timestamps_and_rejects_garbage() {
        let parsed = parse_timestamp(Some("2024-01-15T10:30:00.000+0000")).expect("parses");
        assert_eq!(parsed.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-15 10:30:00");

        // no sub-second part, timezone still stripped
        let parsed = parse_timestamp(Some("2024-01-15T10:30:00+0000")).expect("parses");
        assert_eq!(parsed.format("%H:%M").to_string(), "10:30");

        assert_eq!(parse_timestamp(None), None);
        assert_eq!(parse_timestamp(Some("")), None);
        assert_eq!(parse_timestamp(Some("yesterday")), None);
    }

    #[test]
    fn flattens_structured_bodies_to_text() {
        let ticket = normalize_value(json!({
            "key": "SR-1",
            "fields": {
                "description": {
                    "type": "doc",
                    "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "Line one"}]},
                        {"type": "paragraph", "content": [{"type": "text", "text": "Line two"}]}
                    ]
                }
            }
        }));
        assert_eq!(ticket.description, "Line one\nLine two");
    }
}
