//! Registry HTTP API (distribution v2) metadata source.
//!
//! Reference: https://github.com/opencontainers/distribution-spec

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, LAST_MODIFIED, LINK, LOCATION,
};
use reqwest::{redirect, Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use crate::error::RegistryError;
use crate::manifest::{Manifest, MANIFEST_ACCEPT};
use crate::source::MetadataSource;
use crate::types::{BackendLocation, BlobDigest, BlobInfo, Page};

/// Configuration for the HTTP registry client.
#[derive(Debug, Clone)]
pub struct HttpRegistryConfig {
    /// Registry URL (e.g., "https://registry.example.com").
    pub registry_url: String,
    /// Optional bearer token.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Idle connections kept per host.
    pub max_idle_connections: usize,
}

impl Default for HttpRegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: "http://localhost:5000".to_string(),
            auth_token: None,
            timeout: Duration::from_secs(15),
            max_idle_connections: 100,
        }
    }
}

/// Registry API client.
pub struct HttpRegistryClient {
    base: Url,
    auth_token: Option<String>,
    client: Client,
    /// Blob HEADs must not follow redirects so object-store locations can be recorded.
    no_redirect: Client,
}

#[derive(Debug, Deserialize)]
struct CatalogBody {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagsBody {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpRegistryClient {
    /// Create a new registry client.
    pub fn new(config: HttpRegistryConfig) -> Result<Self, RegistryError> {
        let mut url = config.registry_url.trim_end_matches('/').to_string();
        url.push('/');
        let base =
            Url::parse(&url).map_err(|_| RegistryError::InvalidUrl(config.registry_url.clone()))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .build()?;
        let no_redirect = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            base,
            auth_token: config.auth_token,
            client,
            no_redirect,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, RegistryError> {
        self.base
            .join(path)
            .map_err(|_| RegistryError::InvalidUrl(format!("{}{}", self.base, path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// First URL for a listing, or the continuation cursor resolved against
    /// the registry (next links are often relative).
    fn page_url(
        &self,
        path: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Url, RegistryError> {
        match cursor {
            Some(next) => self
                .base
                .join(next)
                .map_err(|_| RegistryError::InvalidUrl(next.to_string())),
            None => {
                let mut url = self.endpoint(path)?;
                url.query_pairs_mut().append_pair("n", &page_size.to_string());
                Ok(url)
            }
        }
    }

    async fn get_page(&self, url: Url) -> Result<(Response, Option<String>), RegistryError> {
        debug!(url = %url, "Fetching page");
        let response = self.authorize(self.client.get(url.clone())).send().await?;
        let response = check_status(response).await?;
        let next = next_link(response.headers());
        Ok((response, next))
    }
}

/// Map error statuses to `RegistryError`, decoding registry error bodies.
async fn check_status(response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.bytes().await.unwrap_or_default();
    if let Ok(ErrorBody { errors }) = serde_json::from_slice::<ErrorBody>(&body) {
        if let Some(first) = errors.into_iter().next() {
            return Err(RegistryError::Api {
                code: first.code,
                message: first.message,
            });
        }
    }

    Err(RegistryError::Status { status, url })
}

/// Extract the `rel="next"` target from an RFC 5988 `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|link| {
            let mut parts = link.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|p| {
                let p = p.trim().replace(' ', "");
                p == "rel=\"next\"" || p == "rel=next"
            });
            if !is_next {
                return None;
            }
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(str::to_string)
        })
}

fn header_size(headers: &HeaderMap, url: &Url) -> Result<u64, RegistryError> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| RegistryError::MissingHeader {
            header: "Content-Length",
            url: url.to_string(),
        })
}

fn header_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl MetadataSource for HttpRegistryClient {
    async fn catalog_page(
        &self,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, RegistryError> {
        let url = self.page_url("v2/_catalog", page_size, cursor)?;
        let (response, next) = self.get_page(url).await?;
        let body: CatalogBody = serde_json::from_slice(&response.bytes().await?)?;
        Ok(Page::new(body.repositories.unwrap_or_default(), next))
    }

    async fn tags_page(
        &self,
        image: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, RegistryError> {
        let url = self.page_url(&format!("v2/{image}/tags/list"), page_size, cursor)?;
        let (response, next) = self.get_page(url).await?;
        let body: TagsBody = serde_json::from_slice(&response.bytes().await?)?;
        Ok(Page::new(body.tags.unwrap_or_default(), next))
    }

    async fn get_manifest(&self, image: &str, tag: &str) -> Result<Manifest, RegistryError> {
        let url = self.endpoint(&format!("v2/{image}/manifests/{tag}"))?;
        debug!(url = %url, "Fetching manifest");

        let response = self
            .authorize(self.client.get(url).header(ACCEPT, MANIFEST_ACCEPT))
            .send()
            .await?;

        let reference = format!("{image}:{tag}");
        match response.status() {
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(reference)),
            _ => {
                let response = check_status(response).await?;
                let body = response.bytes().await?;
                Manifest::parse(&reference, &body)
            }
        }
    }

    async fn get_blob_info(
        &self,
        image: &str,
        digest: &BlobDigest,
    ) -> Result<BlobInfo, RegistryError> {
        let url = self.endpoint(&format!("v2/{image}/blobs/{digest}"))?;
        debug!(url = %url, "Fetching blob info");

        let response = self.authorize(self.no_redirect.head(url.clone())).send().await?;

        if response.status().is_redirection() {
            let target = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| url.join(v).ok())
                .ok_or_else(|| RegistryError::MissingHeader {
                    header: "Location",
                    url: url.to_string(),
                })?;

            // Redirect targets are pre-signed; credentials must not be forwarded.
            let redirected = check_status(self.client.head(target.clone()).send().await?).await?;
            return Ok(BlobInfo {
                size: header_size(redirected.headers(), &target)?,
                modified_at: header_modified(redirected.headers()),
                location: BackendLocation::from_s3_url(&target),
            });
        }

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(digest.to_string()));
        }

        let response = check_status(response).await?;
        Ok(BlobInfo {
            size: header_size(response.headers(), &url)?,
            modified_at: header_modified(response.headers()),
            location: None,
        })
    }
}
