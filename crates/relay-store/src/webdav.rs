//! WebDAV implementation of [`RemoteStore`] over reqwest.
//!
//! Uses MKCOL / PROPFIND / PUT / GET / DELETE / MOVE / COPY against a
//! configured base URL, with every relay path placed under a root prefix.

use crate::path::RemotePath;
use crate::store::{
    ByteRange, RemoteEntry, RemoteStat, RemoteStore, RemoteStoreError, Result,
};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, trace};
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Body, Method, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
  </d:prop>
</d:propfind>"#;

/// Connection settings for the WebDAV endpoint.
#[derive(Debug, Clone)]
pub struct WebdavConfig {
    /// Endpoint base URL, e.g. `https://nas.example.com:5006`.
    pub base_url: String,
    /// Root prefix every relay path lives under.
    pub root_path: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Accept self-signed certificates (development endpoints).
    pub accept_invalid_certs: bool,
}

impl Default for WebdavConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            root_path: "www".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(60),
            accept_invalid_certs: false,
        }
    }
}

impl WebdavConfig {
    /// Read endpoint settings from `WEBDAV_URL`, `WEBDAV_ROOT_PATH`,
    /// `WEBDAV_USER` and `WEBDAV_PASSWORD`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("WEBDAV_URL") {
            config.base_url = url;
        }
        if let Ok(root) = std::env::var("WEBDAV_ROOT_PATH") {
            config.root_path = root;
        }
        config.username = std::env::var("WEBDAV_USER").ok();
        config.password = std::env::var("WEBDAV_PASSWORD").ok();
        config
    }
}

/// WebDAV-backed remote store.
pub struct WebdavStore {
    config: WebdavConfig,
    http: reqwest::Client,
}

impl WebdavStore {
    pub fn new(config: WebdavConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(RemoteStoreError::Protocol(
                "webdav base_url is required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|err| RemoteStoreError::Protocol(err.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &WebdavConfig {
        &self.config
    }

    /// Absolute URL for a relay path, segments percent-encoded.
    fn url_for(&self, path: &RemotePath) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|err| RemoteStoreError::Protocol(format!("invalid base url: {err}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RemoteStoreError::Protocol("base url cannot carry paths".to_string())
            })?;
            segments.pop_if_empty();
            for segment in RemotePath::normalize(&self.config.root_path).segments() {
                segments.push(segment);
            }
            for segment in path.segments() {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(user) = &self.config.username {
            builder = builder.basic_auth(user, self.config.password.as_deref());
        }
        builder
    }

    /// Issue a PROPFIND and parse the multistatus body. Returns the raw
    /// responses (self entry included) plus the request path for pruning.
    async fn propfind(
        &self,
        path: &RemotePath,
        depth: &str,
    ) -> Result<Option<(Vec<DavResponse>, String)>> {
        let url = self.url_for(path)?;
        let request_path = url.path().trim_end_matches('/').to_string();
        let response = self
            .request(Method::from_bytes(b"PROPFIND").expect("valid method"), url)
            .header("Depth", depth)
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(map_transport_err)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status == StatusCode::MULTI_STATUS || status.is_success() => {
                let body = response.text().await.map_err(map_transport_err)?;
                let responses = parse_multistatus(&body)?;
                Ok(Some((responses, request_path)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteStoreError::Denied(
                format!("PROPFIND {path}: {}", response.status()),
            )),
            status => Err(RemoteStoreError::Protocol(format!(
                "PROPFIND {path}: unexpected status {status}"
            ))),
        }
    }
}

#[async_trait]
impl RemoteStore for WebdavStore {
    async fn create_directory(&self, path: &RemotePath) -> Result<()> {
        let url = self.url_for(path)?;
        trace!("MKCOL {url}");
        let response = self
            .request(Method::from_bytes(b"MKCOL").expect("valid method"), url)
            .send()
            .await
            .map_err(map_transport_err)?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Err(RemoteStoreError::NotFound(
                format!("MKCOL {path}: missing parent ({})", response.status()),
            )),
            status => Err(RemoteStoreError::Denied(format!("MKCOL {path}: {status}"))),
        }
    }

    async fn list_directory(&self, path: &RemotePath) -> Result<Option<Vec<RemoteEntry>>> {
        debug!("list {path}");
        let (responses, request_path) = match self.propfind(path, "1").await? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        Ok(Some(
            prune_self_entry(responses, &request_path)
                .into_iter()
                .map(|r| RemoteEntry {
                    name: r.name,
                    is_dir: r.is_dir,
                    size: r.size,
                })
                .collect(),
        ))
    }

    async fn put_file(&self, path: &RemotePath, source: &Path, overwrite: bool) -> Result<()> {
        let url = self.url_for(path)?;
        let file = tokio::fs::File::open(source).await?;
        let len = file.metadata().await?.len();
        debug!("PUT {url} ({len} bytes)");

        let mut builder = self
            .request(Method::PUT, url)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", len.to_string());
        if !overwrite {
            builder = builder.header("If-None-Match", "*");
        }
        let response = builder
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(map_transport_err)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::PRECONDITION_FAILED => Err(RemoteStoreError::Denied(format!(
                "PUT {path}: target already exists"
            ))),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Err(RemoteStoreError::NotFound(
                format!("PUT {path}: missing parent collection"),
            )),
            status => Err(RemoteStoreError::Denied(format!("PUT {path}: {status}"))),
        }
    }

    async fn get_to_file(
        &self,
        path: &RemotePath,
        dest: &Path,
        range: Option<ByteRange>,
    ) -> Result<()> {
        let url = self.url_for(path)?;
        let mut builder = self.request(Method::GET, url);
        if let Some(range) = range {
            builder = builder.header("Range", format!("bytes={}-{}", range.start, range.end));
        }
        let response = builder.send().await.map_err(map_transport_err)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(RemoteStoreError::NotFound(path.to_string()));
            }
            status if status.is_success() => {}
            status => {
                return Err(RemoteStoreError::Denied(format!("GET {path}: {status}")));
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_transport_err)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn download_to_temp(&self, path: &RemotePath) -> Result<PathBuf> {
        let temp = tempfile::Builder::new()
            .prefix("relay-dl-")
            .tempfile()
            .map_err(RemoteStoreError::Io)?;
        // Detach from the guard; ownership of the file passes to the caller.
        let dest = temp.into_temp_path().keep().map_err(|err| {
            RemoteStoreError::Io(std::io::Error::other(err.to_string()))
        })?;
        match self.get_to_file(path, &dest, None).await {
            Ok(()) => Ok(dest),
            Err(err) => {
                let _ = tokio::fs::remove_file(&dest).await;
                Err(err)
            }
        }
    }

    async fn stat(&self, path: &RemotePath) -> Result<Option<RemoteStat>> {
        let (responses, _) = match self.propfind(path, "0").await? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        // Depth 0: the single response is the entry itself.
        Ok(responses.into_iter().next().map(|r| RemoteStat {
            size: r.size,
            is_dir: r.is_dir,
        }))
    }

    async fn delete(&self, path: &RemotePath) -> Result<()> {
        let url = self.url_for(path)?;
        debug!("DELETE {url}");
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(map_transport_err)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(RemoteStoreError::NotFound(path.to_string())),
            status => Err(RemoteStoreError::Denied(format!("DELETE {path}: {status}"))),
        }
    }

    async fn move_entry(&self, src: &RemotePath, dst: &RemotePath, overwrite: bool) -> Result<()> {
        self.relocate(Method::from_bytes(b"MOVE").expect("valid method"), src, dst, overwrite)
            .await
    }

    async fn copy_entry(&self, src: &RemotePath, dst: &RemotePath, overwrite: bool) -> Result<()> {
        self.relocate(Method::from_bytes(b"COPY").expect("valid method"), src, dst, overwrite)
            .await
    }
}

impl WebdavStore {
    async fn relocate(
        &self,
        method: Method,
        src: &RemotePath,
        dst: &RemotePath,
        overwrite: bool,
    ) -> Result<()> {
        let url = self.url_for(src)?;
        let destination = self.url_for(dst)?;
        let response = self
            .request(method.clone(), url)
            .header("Destination", destination.to_string())
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .send()
            .await
            .map_err(map_transport_err)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(RemoteStoreError::NotFound(src.to_string())),
            StatusCode::PRECONDITION_FAILED => Err(RemoteStoreError::Denied(format!(
                "{method} {src}: destination exists"
            ))),
            status => Err(RemoteStoreError::Denied(format!("{method} {src}: {status}"))),
        }
    }
}

fn map_transport_err(err: reqwest::Error) -> RemoteStoreError {
    RemoteStoreError::Unavailable(err.to_string())
}

#[derive(Debug)]
struct DavResponse {
    /// Decoded href path as sent by the server.
    href: String,
    /// Base name decoded from the href.
    name: String,
    is_dir: bool,
    size: u64,
}

/// Parse a `207 Multi-Status` body into per-entry responses.
///
/// Namespace prefixes vary across servers (`D:`, `d:`, `lp1:`), so matching
/// is done on local names only.
fn parse_multistatus(xml: &str) -> Result<Vec<DavResponse>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut responses = Vec::new();
    let mut current: Option<PartialResponse> = None;
    let mut field = Field::None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => match start.local_name().as_ref() {
                b"response" => current = Some(PartialResponse::default()),
                b"href" => field = Field::Href,
                b"getcontentlength" => field = Field::Length,
                _ => {}
            },
            Ok(Event::Empty(empty)) => {
                if empty.local_name().as_ref() == b"collection" {
                    if let Some(partial) = current.as_mut() {
                        partial.is_dir = true;
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| RemoteStoreError::Protocol(err.to_string()))?;
                if let Some(partial) = current.as_mut() {
                    match field {
                        Field::Href => partial.href.push_str(&value),
                        Field::Length => partial.size = value.trim().parse().unwrap_or(0),
                        Field::None => {}
                    }
                }
            }
            Ok(Event::End(end)) => match end.local_name().as_ref() {
                b"response" => {
                    if let Some(partial) = current.take() {
                        if let Some(response) = partial.finish() {
                            responses.push(response);
                        }
                    }
                }
                b"href" | b"getcontentlength" => field = Field::None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(RemoteStoreError::Protocol(format!(
                    "multistatus parse error: {err}"
                )));
            }
        }
    }

    Ok(responses)
}

/// Which element's text content is currently being read.
#[derive(Debug, Clone, Copy)]
enum Field {
    None,
    Href,
    Length,
}

#[derive(Debug, Default)]
struct PartialResponse {
    href: String,
    is_dir: bool,
    size: u64,
}

impl PartialResponse {
    fn finish(self) -> Option<DavResponse> {
        let decoded = percent_decode_str(self.href.trim())
            .decode_utf8()
            .ok()?
            .into_owned();
        let trimmed = decoded.trim_end_matches('/');
        let name = trimmed.rsplit('/').next().unwrap_or(trimmed).to_string();
        Some(DavResponse {
            href: trimmed.to_string(),
            name,
            is_dir: self.is_dir,
            size: self.size,
        })
    }
}

/// Drop the response describing the requested collection itself, keeping
/// only its children.
fn prune_self_entry(responses: Vec<DavResponse>, request_path: &str) -> Vec<DavResponse> {
    let decoded_request = percent_decode_str(request_path)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| request_path.to_string());
    responses
        .into_iter()
        .filter(|r| r.href != decoded_request)
        .collect()
}
