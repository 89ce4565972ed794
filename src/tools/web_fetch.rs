//! web_fetch：抓取 URL 并返回可读文本
//!
//! GET 请求带超时与 User-Agent；HTML 响应用 html2text 提取正文，失败时退回简单去标签；
//! 超过 max_chars 时截断并追加 ...[truncated]。是否允许访问由审批策略按主机局部性决定。

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;

use crate::parser::ActionInvocation;
use crate::tools::{
    ActionCategory, ActionHandler, ActionRequest, ExecutionContext, ExecutionResult, ParamSpec,
};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// html2text 失败时的回退
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
        || (head.contains('<') && (head.contains("<head") || head.contains("<title") || head.contains("<meta")))
}

fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

/// 按字符截断
fn truncate_chars(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

/// 响应正文转为返回给模型的文本
fn render_body(mut body: String, max_chars: usize) -> String {
    if body.starts_with('\u{FEFF}') {
        body = body.trim_start_matches('\u{FEFF}').to_string();
    }
    let body = if looks_like_html(&body) {
        html_to_text(&body)
    } else {
        body
    };
    truncate_chars(body, max_chars)
}

pub struct WebFetch {
    client: Client,
    max_chars: usize,
}

impl WebFetch {
    pub fn new(timeout_secs: u64, max_chars: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8"));
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self { client, max_chars }
    }
}

#[async_trait]
impl ActionHandler for WebFetch {
    fn id(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page (http or https) and return its readable text content."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::url("url")];
        P
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Browse
    }

    fn preview_partial(&self, invocation: &ActionInvocation) -> Option<String> {
        invocation.params.get("url").map(|u| format!("Fetching {u}..."))
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &ActionRequest,
    ) -> Result<ExecutionResult, String> {
        let url = request.param("url").unwrap_or("").trim();
        tracing::info!(url = %url, "web_fetch");
        let send = self.client.get(url).send();
        let resp = tokio::select! {
            r = send => r.map_err(|e| format!("Request failed: {e}"))?,
            _ = ctx.cancel.cancelled() => return Err("Request was cancelled.".to_string()),
        };
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {e}"))?;
        Ok(ExecutionResult::success(render_body(body, self.max_chars)))
    }
}
