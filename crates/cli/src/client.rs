//! A thin HTTP client for the daemon's `/admin/*` surface.

use reqwest::{RequestBuilder, Response};
use url::Url;

/// Talks to one running `airgapperd` over its admin HTTP surface.
#[derive(Clone, Debug)]
pub struct AirgapperApiClient {
    base_url: Url,
    http: reqwest::Client,
}

impl AirgapperApiClient {
    pub fn new(base_url: String) -> Self {
        let base_url = Url::parse(&base_url).expect("--server produces a valid base URL");
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("admin paths are valid relative URLs")
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.http.put(self.url(path))
    }
}

/// Turn a `reqwest` error, or a non-2xx response, into a single display
/// string for `Args::execute`'s top-level `Result<(), String>`.
pub fn format_http_error(err: reqwest::Error) -> String {
    if let Some(status) = err.status() {
        format!("the daemon responded with {status}: {err}")
    } else {
        format!("couldn't reach the daemon: {err}")
    }
}

/// Check a response's status before decoding its body. Admin-surface
/// errors come back as a plain-text status line, not a JSON body.
pub async fn check_status(response: Response) -> Result<Response, String> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.is_empty() => Err(format!("the daemon responded with {status}: {body}")),
        _ => Err(format!("the daemon responded with {status}")),
    }
}
