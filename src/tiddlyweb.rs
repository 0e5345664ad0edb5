//! TiddlyWeb network backend
//!
//! `Backend` is the seam between the store and the network. `HttpBackend`
//! speaks the TiddlyWeb HTTP API that TiddlySpace and TiddlyWiki's tiddlyweb
//! plugin expect:
//! - `GET /status` for the current user and space
//! - `GET /recipes/{recipe}/tiddlers.json` for the skinny tiddler list
//! - `GET /recipes/{recipe}/tiddlers/{title}` for a single fat tiddler
//! - `PUT /bags/{bag}/tiddlers/{title}` to save
//! - `GET /bags.json` for the bag list

use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;
use crate::types::{ServerStatus, Tiddler};

pub trait Backend: Send + Sync + 'static {
    fn status(&self) -> impl Future<Output = Result<ServerStatus, StoreError>> + Send;

    /// Skinny tiddlers (no text) in a recipe
    fn list_tiddlers(&self, recipe: &str) -> impl Future<Output = Result<Vec<Tiddler>, StoreError>> + Send;

    /// `Ok(None)` only when the server says the tiddler does not exist
    fn get_tiddler(
        &self,
        recipe: &str,
        title: &str,
    ) -> impl Future<Output = Result<Option<Tiddler>, StoreError>> + Send;

    /// Save a tiddler and return its new revision if the server reported one
    fn put_tiddler(
        &self,
        recipe: &str,
        tiddler: &Tiddler,
    ) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send;

    fn list_bags(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}

/// TiddlyWeb over HTTP
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl Backend for HttpBackend {
    async fn status(&self) -> Result<ServerStatus, StoreError> {
        self.get_json("/status").await
    }

    async fn list_tiddlers(&self, recipe: &str) -> Result<Vec<Tiddler>, StoreError> {
        self.get_json(&format!("/recipes/{}/tiddlers.json", urlencoding::encode(recipe)))
            .await
    }

    async fn get_tiddler(&self, recipe: &str, title: &str) -> Result<Option<Tiddler>, StoreError> {
        let url = self.url(&tiddler_path("recipes", recipe, title));
        tracing::debug!("GET {}", url);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StoreError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        let body = resp.text().await?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn put_tiddler(&self, recipe: &str, tiddler: &Tiddler) -> Result<Option<u64>, StoreError> {
        let path = if tiddler.bag.is_empty() {
            tiddler_path("recipes", recipe, &tiddler.title)
        } else {
            tiddler_path("bags", &tiddler.bag, &tiddler.title)
        };
        let url = self.url(&path);
        tracing::debug!("PUT {}", url);

        let resp = self
            .client
            .put(&url)
            .header("X-Requested-With", "TiddlyWiki")
            .json(&put_body(tiddler))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }

        Ok(resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_etag_revision))
    }

    async fn list_bags(&self) -> Result<Vec<String>, StoreError> {
        self.get_json("/bags.json").await
    }
}

fn tiddler_path(collection: &str, container: &str, title: &str) -> String {
    format!(
        "/{}/{}/tiddlers/{}",
        collection,
        urlencoding::encode(container),
        urlencoding::encode(title)
    )
}

/// TiddlyWeb ignores server-owned fields on PUT, so only send what the user controls
fn put_body(tiddler: &Tiddler) -> serde_json::Value {
    let mut body = serde_json::json!({
        "title": tiddler.title,
        "text": tiddler.text_or_empty(),
        "tags": tiddler.tags,
    });
    if !tiddler.tiddler_type.is_empty() {
        body["type"] = serde_json::Value::String(tiddler.tiddler_type.clone());
    }
    if !tiddler.fields.is_empty() {
        body["fields"] = serde_json::json!(tiddler.fields);
    }
    body
}

/// Revision from an etag of the form `"bag/title/revision:hash"`
pub fn parse_etag_revision(etag: &str) -> Option<u64> {
    let etag = etag.trim_start_matches("W/").trim_matches('"');
    let last = etag.rsplit('/').next()?;
    let revision = last.split(':').next()?;
    revision.parse().ok()
}
