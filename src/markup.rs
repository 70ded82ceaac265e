use regex::Regex;

/// Translate Jira wiki markup into Markdown.
///
/// Handles the constructs that actually show up in ticket descriptions:
/// `hN.` headings, `{code}`/`{noformat}` fences, `bq.` quotes, `#` ordered
/// lists, `*bold*`, `{{monospace}}`, and `[text|url]` links. Lines inside a
/// code fence pass through untouched.
pub fn jira_to_markdown(text: &str) -> String {
    let code_marker = Regex::new(r"^\{code(?::([A-Za-z0-9#+.-]+))?\}").expect("regex");
    let heading = Regex::new(r"^h([1-6])\.\s*(.*)$").expect("regex");
    let quote = Regex::new(r"^bq\.\s*(.*)$").expect("regex");
    let ordered = Regex::new(r"^(#+)\s+(.*)$").expect("regex");
    let inline = InlineRules::new();

    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(caps) = code_marker.captures(trimmed) {
            if in_fence {
                out.push("```".to_string());
            } else {
                let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                out.push(format!("```{lang}"));
            }
            in_fence = !in_fence;
            continue;
        }
        if trimmed == "{noformat}" {
            out.push("```".to_string());
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            out.push(line.to_string());
            continue;
        }

        if let Some(caps) = heading.captures(trimmed) {
            let level: usize = caps[1].parse().unwrap_or(1);
            out.push(format!("{} {}", "#".repeat(level), inline.apply(&caps[2])));
            continue;
        }
        if let Some(caps) = quote.captures(trimmed) {
            out.push(format!("> {}", inline.apply(&caps[1])));
            continue;
        }
        if let Some(caps) = ordered.captures(trimmed) {
            let depth = caps[1].len();
            let indent = "   ".repeat(depth - 1);
            out.push(format!("{}1. {}", indent, inline.apply(&caps[2])));
            continue;
        }

        out.push(inline.apply(line));
    }

    out.join("\n")
}

struct InlineRules {
    mono: Regex,
    link: Regex,
    bare_link: Regex,
    bold: Regex,
}

impl InlineRules {
    fn new() -> Self {
        Self {
            mono: Regex::new(r"\{\{(.+?)\}\}").expect("regex"),
            link: Regex::new(r"\[([^|\]]+)\|([^\]]+)\]").expect("regex"),
            bare_link: Regex::new(r"\[(https?://[^\]]+)\]").expect("regex"),
            bold: Regex::new(r"\*([^*\n]+)\*").expect("regex"),
        }
    }

    fn apply(&self, line: &str) -> String {
        let step = self.mono.replace_all(line, "`$1`");
        let step = self.link.replace_all(&step, "[$1]($2)");
        let step = self.bare_link.replace_all(&step, "<$1>");
        let step = self.bold.replace_all(&step, "**$1**");
        step.into_owned()
    }
}

/// Reduce a string to something safe for a file or folder name.
///
/// Keeps alphanumerics, spaces, dashes, and underscores; everything else
/// becomes whitespace and runs of whitespace collapse. With `lowercase` the
/// result is a dash-joined slug, otherwise words stay space-separated. The
/// result is truncated to `max_length` characters with no dangling separator.
pub fn sanitize_name(value: &str, max_length: usize, lowercase: bool) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                ' '
            }
        })
        .collect();

    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let joined = if lowercase {
        words.join("-").to_lowercase()
    } else {
        words.join(" ")
    };

    let mut truncated: String = joined.chars().take(max_length).collect();
    while truncated.ends_with(['-', ' ', '_']) {
        truncated.pop();
    }
    truncated
}

/// Human-readable byte size: "742 B", "1.2 MB", ...
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    for unit in ["KB", "MB", "GB", "TB"] {
        value /= 1024.0;
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
    }
    format!("{value:.1} PB")
}
