//! Reference grammar and per-type resolvers.
//!
//! Each resolver runs with its own timeout. Fast local resolvers (file,
//! p42, tool, search) are bounded with a worker thread + `mpsc::
//! Receiver::recv_timeout`, the same cancellable-boundary shape used for
//! the rule engine's bounded-parallel spirit; the HTTP resolver relies on
//! `reqwest`'s own request timeout instead of a second thread.

use crate::core::config::Config;
use crate::core::error::PortError;
use crate::core::search;
use crate::core::url_cache::{normalize_url, UrlArtifactCache};
use crate::core::vfs::Vfs;
use regex::Regex;
use std::sync::mpsc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    File,
    P42,
    Url,
    Search,
    Tool,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::File => "file",
            ReferenceType::P42 => "p42",
            ReferenceType::Url => "url",
            ReferenceType::Search => "search",
            ReferenceType::Tool => "tool",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(ReferenceType::File),
            "p42" => Some(ReferenceType::P42),
            "url" => Some(ReferenceType::Url),
            "search" => Some(ReferenceType::Search),
            "tool" => Some(ReferenceType::Tool),
            _ => None,
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            ReferenceType::File => Duration::from_secs(3),
            ReferenceType::P42 => Duration::from_secs(5),
            ReferenceType::Url => Duration::from_secs(10),
            ReferenceType::Search => Duration::from_secs(5),
            ReferenceType::Tool => Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub ref_type: ReferenceType,
    pub target: String,
    pub context: Option<String>,
}

impl Reference {
    /// `type:target[:context]`.
    pub fn parse(raw: &str) -> Result<Self, PortError> {
        let mut parts = raw.splitn(3, ':');
        let type_str = parts
            .next()
            .ok_or_else(|| PortError::Validation(format!("malformed reference: {raw}")))?;
        let ref_type = ReferenceType::parse(type_str)
            .ok_or_else(|| PortError::Validation(format!("unknown reference type: {type_str}")))?;
        let target = parts
            .next()
            .ok_or_else(|| PortError::Validation(format!("reference missing target: {raw}")))?
            .to_string();
        let context = parts.next().map(|s| s.to_string());

        match ref_type {
            ReferenceType::Url => {
                let url = url::Url::parse(&target)
                    .map_err(|_| PortError::Validation(format!("invalid url reference: {target}")))?;
                if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                    return Err(PortError::Validation(format!(
                        "url reference must be http(s) with a host: {target}"
                    )));
                }
            }
            ReferenceType::P42 => {
                if !target.starts_with('/') {
                    return Err(PortError::Validation(format!(
                        "p42 reference must start with '/': {target}"
                    )));
                }
            }
            _ => {}
        }
        Ok(Self { ref_type, target, context })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub ref_type: String,
    pub target: String,
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ResolvedContext {
    fn ok(reference: &Reference, content: String) -> Self {
        Self {
            ref_type: reference.ref_type.as_str().to_string(),
            target: reference.target.clone(),
            content,
            success: true,
            error: None,
        }
    }

    fn fail(reference: &Reference, error: impl Into<String>) -> Self {
        Self {
            ref_type: reference.ref_type.as_str().to_string(),
            target: reference.target.clone(),
            content: String::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Runs `f` on a worker thread, returning `Timeout` if it doesn't finish
/// within `timeout`. The worker outlives a timed-out caller (fire-and-
/// forget past that point), matching the "never block resolution" rule.
fn run_bounded<T, F>(timeout: Duration, f: F) -> Result<T, PortError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout)
        .map_err(|_| PortError::Timeout("resolver deadline exceeded".to_string()))
}

fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(max_chars).collect();
        format!("{truncated}\n[...truncated]")
    }
}

fn strip_html(html: &str) -> String {
    let script_re = Regex::new(r"(?is)<script.*?</script>").unwrap();
    let style_re = Regex::new(r"(?is)<style.*?</style>").unwrap();
    let tag_re = Regex::new(r"(?s)<[^>]+>").unwrap();
    let ws_re = Regex::new(r"\s+").unwrap();
    let no_script = script_re.replace_all(html, "");
    let no_style = style_re.replace_all(&no_script, "");
    let no_tags = tag_re.replace_all(&no_style, " ");
    ws_re.replace_all(no_tags.trim(), " ").to_string()
}

pub fn resolve_file(reference: &Reference) -> ResolvedContext {
    let target = reference.target.clone();
    let result = run_bounded(reference.ref_type.timeout(), move || {
        std::fs::read_to_string(&target)
    });
    match result {
        Ok(Ok(content)) => ResolvedContext::ok(reference, truncate(&content, 1_000)),
        Ok(Err(e)) => ResolvedContext::fail(reference, e.to_string()),
        Err(e) => ResolvedContext::fail(reference, e.to_string()),
    }
}

pub fn resolve_p42(reference: &Reference, vfs: &Vfs) -> ResolvedContext {
    let vfs = vfs.clone();
    let target = reference.target.clone();
    let result = run_bounded(reference.ref_type.timeout(), move || vfs.read(&target));
    match result {
        Ok(Ok(bytes)) => {
            let content = String::from_utf8_lossy(&bytes).to_string();
            ResolvedContext::ok(reference, truncate(&content, 800))
        }
        Ok(Err(e)) => ResolvedContext::fail(reference, e.to_string()),
        Err(e) => ResolvedContext::fail(reference, e.to_string()),
    }
}

pub fn resolve_tool(reference: &Reference, vfs: &Vfs) -> ResolvedContext {
    match vfs.relations.find_by_name(&reference.target) {
        Ok(Some(relation)) => match serde_json::to_string_pretty(&relation) {
            Ok(text) => ResolvedContext::ok(reference, text),
            Err(e) => ResolvedContext::fail(reference, e.to_string()),
        },
        Ok(None) => ResolvedContext::fail(reference, "Tool not found"),
        Err(e) => ResolvedContext::fail(reference, e.to_string()),
    }
}

pub fn resolve_search(reference: &Reference, vfs: &Vfs) -> ResolvedContext {
    let filters = search::SearchFilters {
        query: Some(reference.target.clone()),
        limit: 20,
        ..Default::default()
    };
    let results = match search::search(vfs, &filters) {
        Ok(r) => r,
        Err(e) => return ResolvedContext::fail(reference, e.to_string()),
    };
    let mut blocks = Vec::new();
    for result in results.into_iter().filter(|r| r.score >= 2.0).take(5) {
        let header = match result.object_type.as_str() {
            "command" => "[FULL TOOL DEFINITION]",
            "session" => "[FULL CONVERSATION TRANSCRIPT]",
            _ => "[FULL CONTENT]",
        };
        if let Ok(Some(id)) = vfs.index.lookup_path(&result.path) {
            if let Ok(bytes) = vfs.store.read(&id) {
                let content = truncate(&String::from_utf8_lossy(&bytes), 20_000);
                blocks.push(format!("{header}\n{content}"));
            }
        }
    }
    ResolvedContext::ok(reference, blocks.join("\n\n"))
}

pub fn resolve_url(reference: &Reference, cache: &UrlArtifactCache, max_bytes: usize) -> ResolvedContext {
    let normalized = match normalize_url(&reference.target) {
        Ok(n) => n,
        Err(e) => return ResolvedContext::fail(reference, e.to_string()),
    };

    if let Ok(Some(hit)) = cache.get(&normalized) {
        let footer = format!("[Cached from {}]", hit.fetched_at.to_rfc3339());
        return ResolvedContext::ok(reference, format_url_content(&hit.content, &hit.content_type, &footer));
    }

    let target = reference.target.clone();
    let result = run_bounded(Duration::from_secs(10), move || fetch_url(&target, max_bytes));
    let fetched = match result {
        Ok(Ok(f)) => f,
        Ok(Err(e)) => return ResolvedContext::fail(reference, e.to_string()),
        Err(e) => return ResolvedContext::fail(reference, e.to_string()),
    };

    if fetched.status >= 400 {
        return ResolvedContext::fail(reference, format!("http status {}", fetched.status));
    }

    match cache.store(&reference.target, &normalized, &fetched.body, fetched.status, &fetched.content_type) {
        Ok(()) => ResolvedContext::ok(
            reference,
            format_url_content(&fetched.body, &fetched.content_type, "[Freshly fetched]"),
        ),
        Err(_) => ResolvedContext::ok(
            reference,
            format_url_content(&fetched.body, &fetched.content_type, "[Direct fetch - no caching]"),
        ),
    }
}

fn format_url_content(body: &str, content_type: &str, footer: &str) -> String {
    let rendered = if content_type.contains("html") { strip_html(body) } else { body.to_string() };
    format!("{}\n{footer}", truncate(&rendered, 800))
}

struct FetchedUrl {
    body: String,
    status: u16,
    content_type: String,
}

fn fetch_url(target: &str, max_bytes: usize) -> Result<FetchedUrl, PortError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(8))
        .user_agent("Port42-ReferenceResolver/1.0")
        .build()
        .map_err(|e| PortError::Io(std::io::Error::other(e.to_string())))?;
    let response = client
        .get(target)
        .send()
        .map_err(|e| PortError::Io(std::io::Error::other(e.to_string())))?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let bytes = response
        .bytes()
        .map_err(|e| PortError::Io(std::io::Error::other(e.to_string())))?;
    let capped = &bytes[..bytes.len().min(max_bytes)];
    Ok(FetchedUrl {
        body: String::from_utf8_lossy(capped).to_string(),
        status,
        content_type,
    })
}

/// Dispatches to the resolver for `reference.ref_type`, producing a
/// per-reference `ResolvedContext` that never fails the whole request.
pub fn resolve(reference: &Reference, vfs: &Vfs, cache: &UrlArtifactCache, config: &Config) -> ResolvedContext {
    match reference.ref_type {
        ReferenceType::File => resolve_file(reference),
        ReferenceType::P42 => resolve_p42(reference, vfs),
        ReferenceType::Tool => resolve_tool(reference, vfs),
        ReferenceType::Search => resolve_search(reference, vfs),
        ReferenceType::Url => resolve_url(reference, cache, config.url_cache_max_bytes),
    }
}

const BLOCK_CONTENT_CAP_CHARS: usize = 2_000;
const OMISSION_MARKER: &str = "[Additional references omitted due to size limit]";
const FOOTER: &str = "Use this contextual information to generate more relevant tools.";

/// Assembles the single text block handed to the AI: header, one block per
/// successful resolution (in input order) capped at 2,000 chars each,
/// stopping and appending the omission marker once `budget_bytes` would be
/// exceeded, then the footer.
pub fn format_ai_context(resolved: &[ResolvedContext], budget_bytes: usize) -> String {
    let mut body = String::from("CONTEXTUAL INFORMATION:");
    let mut omitted = false;

    for r in resolved.iter().filter(|r| r.success && !r.content.is_empty()) {
        let label = capitalize(&r.ref_type);
        let block = format!("\n{label} Reference ({}):\n{}\n", r.target, truncate(&r.content, BLOCK_CONTENT_CAP_CHARS));
        if body.len() + block.len() > budget_bytes {
            omitted = true;
            break;
        }
        body.push_str(&block);
    }

    if omitted {
        body.push_str(&format!("\n{OMISSION_MARKER}\n"));
    }
    body.push_str(&format!("\n{FOOTER}"));
    body
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_reference() {
        let r = Reference::parse("file:/etc/hosts").unwrap();
        assert_eq!(r.ref_type, ReferenceType::File);
        assert_eq!(r.target, "/etc/hosts");
        assert!(r.context.is_none());
    }

    #[test]
    fn test_parse_with_context() {
        let r = Reference::parse("p42:/commands/git-status:why it matters").unwrap();
        assert_eq!(r.context.as_deref(), Some("why it matters"));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(Reference::parse("ftp:thing").is_err());
    }

    #[test]
    fn test_parse_url_requires_scheme_and_host() {
        assert!(Reference::parse("url:not-a-url").is_err());
        assert!(Reference::parse("url:https://example.com/a").is_ok());
    }

    #[test]
    fn test_parse_p42_requires_leading_slash() {
        assert!(Reference::parse("p42:relative/path").is_err());
        assert!(Reference::parse("p42:/absolute/path").is_ok());
    }

    #[test]
    fn test_resolve_file_missing_is_soft_failure() {
        let r = Reference::parse("file:/no/such/file/at/all").unwrap();
        let resolved = resolve_file(&r);
        assert!(!resolved.success);
        assert!(resolved.error.is_some());
    }

    #[test]
    fn test_truncate_under_limit_is_unchanged() {
        assert_eq!(truncate("short", 100), "short");
    }

    #[test]
    fn test_strip_html_removes_script_and_tags() {
        let html = "<html><script>alert(1)</script><body><p>Hello</p></body></html>";
        let stripped = strip_html(html);
        assert!(!stripped.contains("<"));
        assert!(stripped.contains("Hello"));
        assert!(!stripped.contains("alert"));
    }

    fn success(ref_type: &str, target: &str, content: String) -> ResolvedContext {
        ResolvedContext { ref_type: ref_type.to_string(), target: target.to_string(), content, success: true, error: None }
    }

    #[test]
    fn test_format_ai_context_includes_header_and_footer() {
        let resolved = vec![success("file", "/etc/hosts", "localhost".to_string())];
        let formatted = format_ai_context(&resolved, 8_192);
        assert!(formatted.starts_with("CONTEXTUAL INFORMATION:"));
        assert!(formatted.ends_with(FOOTER));
        assert!(formatted.contains("File Reference (/etc/hosts):"));
    }

    #[test]
    fn test_format_ai_context_drops_failed_resolutions() {
        let resolved = vec![ResolvedContext::fail(
            &Reference::parse("file:/missing").unwrap(),
            "not found",
        )];
        let formatted = format_ai_context(&resolved, 8_192);
        assert!(!formatted.contains("File Reference"));
    }

    #[test]
    fn test_format_ai_context_respects_budget_and_marks_omission() {
        let resolved: Vec<ResolvedContext> = (0..10)
            .map(|i| success("url", &format!("https://example.com/{i}"), "x".repeat(2_000)))
            .collect();
        let formatted = format_ai_context(&resolved, 8_192);
        assert!(formatted.contains(OMISSION_MARKER));
        assert!(formatted.len() <= 8_192 + OMISSION_MARKER.len() + FOOTER.len() + 16);
    }
}
