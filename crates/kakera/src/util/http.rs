use std::{ops::Deref, sync::Arc};

use reqwest::{header::HeaderMap, Client, ClientBuilder, IntoUrl};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::error::KakeraResult;

/// A `reqwest` client sharing one cookie store between fragment requests and
/// heartbeat pings.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> KakeraResult<Self> {
        Self::with_headers(builder, HeaderMap::new())
    }

    /// Build a client that sends `headers` with every request.
    pub fn with_headers(builder: ClientBuilder, headers: HeaderMap) -> KakeraResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder
            .default_headers(headers)
            .cookie_provider(cookies_store.clone())
            .build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> KakeraResult<()> {
        let url = url.into_url()?;
        let Ok(mut lock) = self.cookies_store.lock() else {
            tracing::warn!("Cookie store is poisoned, cookies for {url} were dropped.");
            return Ok(());
        };
        for cookie in cookies {
            if let Err(e) = lock.parse(&cookie, &url) {
                tracing::warn!("Invalid cookie {cookie:?}: {e}");
            }
        }
        Ok(())
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookies_store.clone())
            .build()
            .unwrap_or_default();

        Self {
            client,
            cookies_store,
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
