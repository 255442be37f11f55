// shipper/elasticsearch.rs

//! An [`Index`] backed by the Elasticsearch HTTP API.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};

use super::{Ack, Index, IndexError};

/// Error bodies longer than this are cut short before being put in an [`IndexError`].
const MAX_ERROR_BODY: usize = 512;

/// Basic-auth credentials for the backend.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    /// The user name.
    pub username: String,

    /// The password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The subset of an index response we care about.
#[derive(serde::Deserialize)]
struct IndexResponse {
    #[serde(rename = "_id")]
    id: Option<String>,
}

/// An Elasticsearch cluster reachable at one or more base URLs.
///
/// Requests are spread round-robin over the addresses, so retrying a failed write reaches a
/// different node when more than one is configured.
#[derive(Debug)]
pub struct Elasticsearch {
    client: Client,
    addresses: Vec<Url>,
    credentials: Option<Credentials>,
    index_name: String,
    next_address: AtomicUsize,
}

impl Elasticsearch {
    /// Construct a client for the cluster at `addresses`, writing to `index_name`.
    ///
    /// No requests are made until [`Index::health_check`] or [`Index::index`] is called. Each
    /// request times out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Fatal`] if `addresses` is empty or the HTTP client cannot be built.
    pub fn connect(
        addresses: Vec<Url>,
        credentials: Option<Credentials>,
        index_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        if addresses.is_empty() {
            return Err(IndexError::Fatal(
                "no Elasticsearch addresses configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| IndexError::Fatal(format!("failed to build HTTP client: {}", error)))?;

        Ok(Self {
            client,
            addresses,
            credentials,
            index_name: index_name.into(),
            next_address: AtomicUsize::new(0),
        })
    }

    fn next_address(&self) -> &Url {
        let slot = self.next_address.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        &self.addresses[slot]
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => request,
        }
    }

    fn document_url(&self, address: &Url) -> Result<Url, IndexError> {
        let mut url = address.clone();
        url.path_segments_mut()
            .map_err(|()| IndexError::Fatal(format!("{} cannot be a base URL", address)))?
            .pop_if_empty()
            .push(&self.index_name)
            .push("_doc");
        Ok(url)
    }
}

#[async_trait]
impl Index for Elasticsearch {
    /// Check each address in turn until one responds successfully.
    ///
    /// An authentication failure from any node fails immediately, since every node shares the same
    /// security configuration.
    async fn health_check(&self) -> Result<(), IndexError> {
        let mut last_error = None;

        for address in &self.addresses {
            debug!("Checking Elasticsearch health at {}", address);

            let error = match self.request(Method::GET, address.clone()).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => error_for_response(response).await,
                Err(error) => error_for_transport(&error),
            };

            if let IndexError::Fatal(_) = error {
                return Err(error);
            }
            debug!("Elasticsearch at {} is unavailable: {}", address, error);
            last_error = Some(error);
        }

        Err(last_error
            .unwrap_or_else(|| IndexError::Fatal("no Elasticsearch addresses configured".into())))
    }

    async fn index(&self, document: &serde_json::Value) -> Result<Ack, IndexError> {
        let url = self.document_url(self.next_address())?;
        trace!("POST {} {}", url, document);

        let response = self
            .request(Method::POST, url)
            .json(document)
            .send()
            .await
            .map_err(|error| error_for_transport(&error))?;

        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }

        let id = response
            .json::<IndexResponse>()
            .await
            .ok()
            .and_then(|response| response.id);
        Ok(Ack { id })
    }
}

/// Classify a response with an unsuccessful status code.
async fn error_for_response(response: Response) -> IndexError {
    let status = response.status();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    classify_status(status, format!("{}: {}", status, body))
}

/// Map an HTTP status code onto an [`IndexError`] class.
///
/// - Authentication, authorization and missing-resource failures will not resolve themselves, so
///   they are fatal.
/// - Timeouts, throttling and server errors are transient.
/// - Any other client error is specific to the document, so it is rejected.
fn classify_status(status: StatusCode, message: String) -> IndexError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            IndexError::Fatal(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            IndexError::Transient(message)
        }
        status if status.is_server_error() => IndexError::Transient(message),
        _ => IndexError::Rejected(message),
    }
}

/// Classify a failure to get any response at all.
fn error_for_transport(error: &reqwest::Error) -> IndexError {
    if error.is_builder() {
        IndexError::Fatal(format!("invalid request: {}", error))
    } else {
        IndexError::Transient(format!("request failed: {}", error))
    }
}
