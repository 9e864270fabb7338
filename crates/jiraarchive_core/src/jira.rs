use anyhow::{Context, Result};
use serde::Deserialize;

use crate::http::{ApiRequest, HttpTransport, join_url};

const SEARCH_PATH: &str = "rest/api/2/search";
const SEARCH_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub key: String,
    pub summary: String,
}

pub trait IssueSearch {
    /// Every issue matching `jql`, in the order the tracker returns them.
    fn search(&mut self, jql: &str) -> Result<Vec<Issue>>;
    fn request_count(&self) -> usize;
}

pub struct JiraClient {
    transport: HttpTransport,
    base_url: String,
}

impl JiraClient {
    pub fn new(transport: HttpTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }
}

impl IssueSearch for JiraClient {
    fn search(&mut self, jql: &str) -> Result<Vec<Issue>> {
        let url = join_url(&self.base_url, SEARCH_PATH)?;
        let issues = collect_issues(|start_at| {
            let params = [
                ("jql", jql.to_string()),
                ("fields", "summary".to_string()),
                ("startAt", start_at.to_string()),
                ("maxResults", SEARCH_PAGE_SIZE.to_string()),
            ];
            let response = self
                .transport
                .send_json(&ApiRequest::get(url.clone(), &params))
                .with_context(|| format!("issue search failed for query `{jql}`"))?;
            serde_json::from_value(response).context("failed to decode issue search response")
        })?;

        log::debug!("query `{jql}` matched {} issue(s)", issues.len());
        Ok(issues)
    }

    fn request_count(&self) -> usize {
        self.transport.request_count()
    }
}

/// Drive `fetch_page` from `startAt = 0` until the result set is exhausted,
/// keeping issues in the order the pages deliver them.
fn collect_issues<F>(mut fetch_page: F) -> Result<Vec<Issue>>
where
    F: FnMut(usize) -> Result<SearchResponse>,
{
    let mut issues = Vec::new();
    loop {
        let page = fetch_page(issues.len())?;
        let received = page.issues.len();
        issues.extend(page.issues.into_iter().map(|item| Issue {
            key: item.key,
            summary: item.fields.summary.unwrap_or_default(),
        }));
        if !has_more_pages(received, issues.len(), page.max_results, page.total) {
            return Ok(issues);
        }
    }
}

fn has_more_pages(
    received: usize,
    collected: usize,
    max_results: Option<usize>,
    total: Option<usize>,
) -> bool {
    if received == 0 {
        return false;
    }
    match total {
        Some(total) => collected < total,
        None => received >= max_results.unwrap_or(SEARCH_PAGE_SIZE),
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    max_results: Option<usize>,
    total: Option<usize>,
    #[serde(default)]
    issues: Vec<IssueItem>,
}

#[derive(Debug, Deserialize)]
struct IssueItem {
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Deserialize, Default)]
struct IssueFields {
    summary: Option<String>,
}
