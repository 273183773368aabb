use pulldown_cmark::{Options, Parser, html};

/// Fallback shown in chat when the report has no recognizable root cause.
pub const DEFAULT_ROOT_CAUSE: &str = "See investigation report";
/// Fallback confidence marker.
pub const DEFAULT_CONFIDENCE: &str = "UNKNOWN";

const EXCERPT_MAX_LEN: usize = 400;

/// Render the investigation report to a standalone HTML document.
#[must_use]
pub fn render_html(title: &str, markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options);
    let mut body = String::with_capacity(markdown.len() * 2);
    html::push_html(&mut body, parser);

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
         <style>body{{font-family:sans-serif;max-width:60rem;margin:2rem auto;padding:0 1rem}}\
         pre{{background:#f5f5f5;padding:1rem;overflow-x:auto}}</style>\n</head>\n<body>\n\
         {body}</body>\n</html>\n"
    )
}

/// Root-cause and confidence lines pulled from a Markdown report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportExcerpts {
    pub root_cause: String,
    pub confidence: String,
}

impl Default for ReportExcerpts {
    fn default() -> Self {
        Self {
            root_cause: DEFAULT_ROOT_CAUSE.to_owned(),
            confidence: DEFAULT_CONFIDENCE.to_owned(),
        }
    }
}

/// Tolerant scan over the report for `Root Cause` and `Confidence`
/// sections. Accepts headings (`## Root Cause`) with the text in the
/// following paragraph, or inline labels (`**Root Cause**: ...`,
/// `Confidence: high`). Absence yields the defaults.
#[must_use]
pub fn extract_excerpts(markdown: &str) -> ReportExcerpts {
    let mut excerpts = ReportExcerpts::default();

    let lines: Vec<&str> = markdown.lines().collect();
    if let Some(text) = find_section(&lines, "root cause") {
        excerpts.root_cause = clamp(&text);
    }
    if let Some(text) = find_section(&lines, "confidence") {
        excerpts.confidence = clamp(&text);
    }
    excerpts
}

fn find_section(lines: &[&str], label: &str) -> Option<String> {
    for (index, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        if let Some(rest) = inline_value(trimmed, label) {
            if !rest.is_empty() {
                return Some(rest.to_owned());
            }
        }

        if is_heading_for(trimmed, label) {
            let section: Vec<&str> = lines[index + 1..]
                .iter()
                .map(|l| l.trim())
                .skip_while(|l| l.is_empty())
                .take_while(|l| !l.is_empty() && !l.starts_with('#'))
                .collect();
            if !section.is_empty() {
                return Some(section.join(" "));
            }
        }
    }
    None
}

/// Match `**Label**: value`, `Label: value` and minor variants.
fn inline_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let stripped = line.trim_start_matches(['*', '_', '-', ' ']);
    let lower = stripped.to_lowercase();
    if !lower.starts_with(label) {
        return None;
    }
    let after = &stripped[label.len()..];
    let after = after.trim_start_matches(['*', '_']);
    let after = after.strip_prefix(':')?;
    Some(after.trim())
}

fn is_heading_for(line: &str, label: &str) -> bool {
    let Some(rest) = line.strip_prefix('#') else {
        return false;
    };
    rest.trim_start_matches('#')
        .trim()
        .to_lowercase()
        .starts_with(label)
}

fn clamp(text: &str) -> String {
    if text.len() <= EXCERPT_MAX_LEN {
        return text.to_owned();
    }
    let mut cut = EXCERPT_MAX_LEN;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
