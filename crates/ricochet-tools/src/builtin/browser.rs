// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Text-mode browser tools.
//!
//! The four browser tools share one [`BrowserState`]: `browser_open` fetches
//! a page and renders it to text, indexing its links and form fields;
//! `browser_click` follows an indexed link; `browser_type` fills an indexed
//! form field (kept in state and echoed back — there is no JS execution);
//! `browser_screenshot` returns the current text rendering.  Good enough for
//! documentation reading and link-following, which is what agents actually
//! use a browser for in a headless engine.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::tool::{floor_char_boundary, Tool, ToolCall, ToolOutput};

const MAX_PAGE_CHARS: usize = 50_000;
const RENDER_WIDTH: usize = 100;

#[derive(Debug, Default, Clone)]
pub struct Page {
    pub url: String,
    pub text: String,
    /// (index, href, label)
    pub links: Vec<(usize, String, String)>,
    /// (name, typed value)
    pub fields: Vec<(String, String)>,
}

#[derive(Default)]
pub struct BrowserState {
    page: Mutex<Option<Page>>,
    client: reqwest::Client,
}

impl BrowserState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn open(&self, url: &str) -> anyhow::Result<Page> {
        debug!(url, "browser open");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {status} fetching {url}");
        }
        let final_url = resp.url().to_string();
        let html = resp.text().await?;

        let links = extract_links(&html);
        let fields = extract_fields(&html);
        let mut text = html2text::from_read(html.as_bytes(), RENDER_WIDTH);
        if text.len() > MAX_PAGE_CHARS {
            // Non-ASCII pages are the norm; cut on a char boundary.
            text.truncate(floor_char_boundary(&text, MAX_PAGE_CHARS));
            text.push_str("\n...[page truncated]");
        }

        let page = Page {
            url: final_url,
            text,
            links,
            fields,
        };
        *self.page.lock().await = Some(page.clone());
        Ok(page)
    }

    async fn current(&self) -> Option<Page> {
        self.page.lock().await.clone()
    }

    async fn set_field(&self, selector: &str, value: &str) -> anyhow::Result<()> {
        let mut guard = self.page.lock().await;
        let page = guard.as_mut().ok_or_else(|| anyhow::anyhow!("no page open"))?;
        match page.fields.iter_mut().find(|(n, _)| n == selector) {
            Some((_, v)) => {
                *v = value.to_string();
                Ok(())
            }
            None => {
                // Unknown fields are recorded anyway — static extraction
                // misses scripted inputs, and the agent only reads them back.
                page.fields.push((selector.to_string(), value.to_string()));
                Ok(())
            }
        }
    }
}

fn extract_links(html: &str) -> Vec<(usize, String, String)> {
    // Tag-level extraction is enough for link-following; no DOM needed.
    let re = Regex::new(r#"(?is)<a[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("static regex");
    let tag_strip = Regex::new(r"(?s)<[^>]*>").expect("static regex");
    re.captures_iter(html)
        .take(200)
        .enumerate()
        .map(|(i, cap)| {
            let href = cap[1].to_string();
            let label = tag_strip
                .replace_all(&cap[2], "")
                .trim()
                .chars()
                .take(80)
                .collect::<String>();
            (i, href, label)
        })
        .collect()
}

fn extract_fields(html: &str) -> Vec<(String, String)> {
    let re = Regex::new(r#"(?is)<(?:input|textarea|select)[^>]*name\s*=\s*["']([^"']+)["']"#)
        .expect("static regex");
    re.captures_iter(html)
        .take(50)
        .map(|cap| (cap[1].to_string(), String::new()))
        .collect()
}

fn render_page(page: &Page) -> String {
    let mut out = format!("URL: {}\n\n{}", page.url, page.text);
    if !page.links.is_empty() {
        out.push_str("\n\nLinks:\n");
        for (i, href, label) in page.links.iter().take(50) {
            out.push_str(&format!("[{i}] {label} -> {href}\n"));
        }
    }
    if !page.fields.is_empty() {
        out.push_str("\nForm fields:\n");
        for (name, value) in &page.fields {
            out.push_str(&format!("  {name} = {value:?}\n"));
        }
    }
    out
}

/// Resolve a relative href against the current page URL.  Only the cases a
/// text browser meets are handled: absolute URLs, host-relative paths, and
/// simple relative paths.
fn resolve_href(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix('/') {
        if let Some(scheme_end) = base.find("://") {
            if let Some(host_end) = base[scheme_end + 3..].find('/') {
                return format!("{}/{}", &base[..scheme_end + 3 + host_end], rest);
            }
            return format!("{}/{}", base.trim_end_matches('/'), rest);
        }
    }
    let trimmed = base.rfind('/').map(|i| &base[..i]).unwrap_or(base);
    format!("{trimmed}/{href}")
}

// ─── Tools ────────────────────────────────────────────────────────────────────

pub struct BrowserOpenTool {
    pub state: Arc<BrowserState>,
}

#[async_trait]
impl Tool for BrowserOpenTool {
    fn name(&self) -> &str {
        "browser_open"
    }

    fn description(&self) -> &str {
        "Open a URL and return the page as readable text. Links are indexed \
         for browser_click; form fields are listed for browser_type."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string", "description": "http(s) URL" } },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let url = match call.args.get("url").and_then(|v| v.as_str()) {
            Some(u) => u,
            None => return ToolOutput::err(&call.id, "missing 'url'"),
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::err(&call.id, "only http(s) URLs are supported");
        }
        match self.state.open(url).await {
            Ok(page) => ToolOutput::ok(&call.id, render_page(&page)),
            Err(e) => ToolOutput::err(&call.id, format!("open error: {e}")),
        }
    }
}

pub struct BrowserClickTool {
    pub state: Arc<BrowserState>,
}

#[async_trait]
impl Tool for BrowserClickTool {
    fn name(&self) -> &str {
        "browser_click"
    }

    fn description(&self) -> &str {
        "Follow a link on the current page, by link index (from browser_open) \
         or by exact/substring label match."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "link": { "type": "integer", "description": "Link index" },
                "label": { "type": "string", "description": "Link text to match instead of an index" }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(page) = self.state.current().await else {
            return ToolOutput::err(&call.id, "no page open; use browser_open first");
        };
        let target = if let Some(i) = call.args.get("link").and_then(|v| v.as_u64()) {
            page.links.iter().find(|(idx, _, _)| *idx == i as usize)
        } else if let Some(label) = call.args.get("label").and_then(|v| v.as_str()) {
            page.links
                .iter()
                .find(|(_, _, l)| l == label)
                .or_else(|| page.links.iter().find(|(_, _, l)| l.contains(label)))
        } else {
            return ToolOutput::err(&call.id, "provide 'link' index or 'label'");
        };
        let Some((_, href, _)) = target else {
            return ToolOutput::err(&call.id, "no such link on the current page");
        };
        let url = resolve_href(&page.url, href);
        match self.state.open(&url).await {
            Ok(page) => ToolOutput::ok(&call.id, render_page(&page)),
            Err(e) => ToolOutput::err(&call.id, format!("click error: {e}")),
        }
    }
}

pub struct BrowserTypeTool {
    pub state: Arc<BrowserState>,
}

#[async_trait]
impl Tool for BrowserTypeTool {
    fn name(&self) -> &str {
        "browser_type"
    }

    fn description(&self) -> &str {
        "Type text into a named form field on the current page. The value is \
         recorded in the page state (no script execution happens)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "field": { "type": "string", "description": "Form field name" },
                "text": { "type": "string" }
            },
            "required": ["field", "text"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let field = match call.args.get("field").and_then(|v| v.as_str()) {
            Some(f) => f,
            None => return ToolOutput::err(&call.id, "missing 'field'"),
        };
        let text = call.args.get("text").and_then(|v| v.as_str()).unwrap_or("");
        match self.state.set_field(field, text).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("typed into {field}")),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

pub struct BrowserScreenshotTool {
    pub state: Arc<BrowserState>,
}

#[async_trait]
impl Tool for BrowserScreenshotTool {
    fn name(&self) -> &str {
        "browser_screenshot"
    }

    fn description(&self) -> &str {
        "Return the current page's text rendering (the text-mode equivalent \
         of a screenshot)."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.state.current().await {
            Some(page) => ToolOutput::ok(&call.id, render_page(&page)),
            None => ToolOutput::err(&call.id, "no page open; use browser_open first"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
