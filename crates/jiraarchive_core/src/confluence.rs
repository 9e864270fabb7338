use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{ApiRequest, HttpTransport, expect_json, join_url};

const CONTENT_PATH: &str = "rest/api/content";
const RECENT_PAGES_CQL: &str = "type=page order by lastmodified desc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub space_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub version: u64,
    pub body: String,
    pub space_key: String,
    pub space_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUpdate {
    pub id: String,
    pub title: String,
    pub space_key: String,
    pub body: String,
    pub version: u64,
    pub message: String,
}

impl PageUpdate {
    /// The next version of `page` carrying `body`.
    pub fn next_version(page: &Page, body: String, message: &str) -> Self {
        Self {
            id: page.id.clone(),
            title: page.title.clone(),
            space_key: page.space_key.clone(),
            body,
            version: page.version + 1,
            message: message.to_string(),
        }
    }
}

pub trait PageStore {
    fn recent_pages(&mut self, limit: usize) -> Result<Vec<PageSummary>>;
    fn get_page(&mut self, page_id: &str) -> Result<Page>;
    fn put_page(&mut self, update: &PageUpdate) -> Result<()>;
    fn request_count(&self) -> usize;
}

pub struct ConfluenceClient {
    transport: HttpTransport,
    base_url: String,
}

impl ConfluenceClient {
    pub fn new(transport: HttpTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    fn content_url(&self, page_id: &str) -> Result<reqwest::Url> {
        join_url(&self.base_url, &format!("{CONTENT_PATH}/{page_id}"))
    }
}

impl PageStore for ConfluenceClient {
    fn recent_pages(&mut self, limit: usize) -> Result<Vec<PageSummary>> {
        let url = join_url(&self.base_url, &format!("{CONTENT_PATH}/search"))?;
        let params = [
            ("cql", RECENT_PAGES_CQL.to_string()),
            ("limit", limit.to_string()),
            ("expand", "version,space".to_string()),
        ];
        let response = self
            .transport
            .send(&ApiRequest::get(url.clone(), &params))?;
        if let Some(error) = login_status_error(response.status()) {
            return Err(error);
        }
        let payload = expect_json(response, &url)?;
        summaries_from_payload(payload, limit)
    }

    fn get_page(&mut self, page_id: &str) -> Result<Page> {
        let url = self.content_url(page_id)?;
        let params = [("expand", "body.storage,version,space".to_string())];
        let response = self
            .transport
            .send(&ApiRequest::get(url.clone(), &params))?;
        if let Some(error) = page_status_error(response.status(), page_id) {
            return Err(error);
        }
        let payload = expect_json(response, &url)
            .with_context(|| format!("failed to fetch page {page_id}"))?;
        page_from_payload(payload, page_id)
    }

    fn put_page(&mut self, update: &PageUpdate) -> Result<()> {
        let url = self.content_url(&update.id)?;
        let params = [("expand", "body.storage".to_string())];
        let payload = serde_json::to_value(UpdatePayload::from(update))
            .context("failed to encode page update")?;
        let response = self
            .transport
            .send(&ApiRequest::put(url.clone(), &params, &payload))?;
        expect_json(response, &url)
            .with_context(|| format!("failed to update page {}", update.id))?;
        log::debug!("page {} now at version {}", update.id, update.version);
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.transport.request_count()
    }
}

// The recent pages listing doubles as the login check.
fn login_status_error(status: StatusCode) -> Option<anyhow::Error> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(anyhow::anyhow!(
            "failed to connect to Confluence; verify your login credentials"
        )),
        _ => None,
    }
}

fn page_status_error(status: StatusCode, page_id: &str) -> Option<anyhow::Error> {
    match status {
        StatusCode::NOT_FOUND => Some(anyhow::anyhow!("no page with id {page_id} exists")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(anyhow::anyhow!("not authorized for page {page_id}"))
        }
        _ => None,
    }
}

fn summaries_from_payload(payload: Value, limit: usize) -> Result<Vec<PageSummary>> {
    let parsed: SearchResponse =
        serde_json::from_value(payload).context("failed to decode recent pages response")?;
    Ok(parsed
        .results
        .into_iter()
        .take(limit)
        .map(|item| PageSummary {
            id: item.id,
            title: item.title,
            space_name: item.space.map(|space| space.name).unwrap_or_default(),
        })
        .collect())
}

fn page_from_payload(payload: Value, page_id: &str) -> Result<Page> {
    let parsed: PageItem =
        serde_json::from_value(payload).context("failed to decode page response")?;

    let body = parsed
        .body
        .and_then(|body| body.storage)
        .map(|storage| storage.value)
        .ok_or_else(|| anyhow::anyhow!("page {page_id} has no storage body"))?;
    let version = parsed
        .version
        .map(|version| version.number)
        .ok_or_else(|| anyhow::anyhow!("page {page_id} has no version number"))?;
    let space = parsed
        .space
        .ok_or_else(|| anyhow::anyhow!("page {page_id} has no space"))?;

    Ok(Page {
        id: parsed.id,
        title: parsed.title,
        version,
        body,
        space_key: space.key,
        space_name: space.name,
    })
}

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: String,
    title: String,
    space: Option<SpaceItem>,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    id: String,
    title: String,
    version: Option<VersionItem>,
    body: Option<BodyItem>,
    space: Option<SpaceItem>,
}

#[derive(Debug, Deserialize)]
struct VersionItem {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct BodyItem {
    storage: Option<StorageItem>,
}

#[derive(Debug, Deserialize)]
struct StorageItem {
    value: String,
}

#[derive(Debug, Deserialize)]
struct SpaceItem {
    #[serde(default)]
    key: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct UpdatePayload<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'a str,
    space: SpaceRef<'a>,
    body: UpdateBody<'a>,
    version: UpdateVersion<'a>,
}

#[derive(Debug, Serialize)]
struct SpaceRef<'a> {
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    storage: UpdateStorage<'a>,
}

#[derive(Debug, Serialize)]
struct UpdateStorage<'a> {
    value: &'a str,
    representation: &'static str,
}

#[derive(Debug, Serialize)]
struct UpdateVersion<'a> {
    number: u64,
    message: &'a str,
}

impl<'a> From<&'a PageUpdate> for UpdatePayload<'a> {
    fn from(update: &'a PageUpdate) -> Self {
        Self {
            id: &update.id,
            kind: "page",
            title: &update.title,
            space: SpaceRef {
                key: &update.space_key,
            },
            body: UpdateBody {
                storage: UpdateStorage {
                    value: &update.body,
                    representation: "storage",
                },
            },
            version: UpdateVersion {
                number: update.version,
                message: &update.message,
            },
        }
    }
}
