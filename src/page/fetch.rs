//! Image proxy fetcher.
//!
//! Page-context fetches of cross-origin images are blocked by canvas taint
//! rules unless the resource opts in or the user granted the broad optional
//! host permission. With the grant, images are fetched directly from the
//! restricted context; without it, the request is relayed over the message
//! channel and the privileged context performs an unrestricted fetch.
//!
//! [`ImageProxyFetcher::fetch_image`] never fails: an irrecoverable fetch
//! resolves to `None` so a capture compositing many images skips just the
//! missing one. A direct-fetch failure additionally raises a one-time,
//! debounced permission upsell on the tool surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use reqwest::header::ACCEPT;
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::page::dom::Surface;
use crate::protocol::{MessageSender, PermissionSet};

/// Accept header sent with direct image fetches.
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// Delay before the permission warning becomes visible, so a burst of failed
/// images settles into a single upsell.
const WARNING_DELAY: Duration = Duration::from_millis(100);

/// The page's own fetch capability, subject to the page's origin policy.
#[async_trait]
pub trait PageFetch: Send + Sync {
    /// Fetch a URL and return its body as inline image data.
    async fn fetch_data_url(&self, url: &str, timeout: Option<Duration>) -> Result<String>;
}

/// `reqwest`-backed page fetch with a permissive image accept header.
pub struct HttpPageFetch {
    client: reqwest::Client,
}

impl HttpPageFetch {
    pub fn new() -> Self {
        HttpPageFetch {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPageFetch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetch for HttpPageFetch {
    async fn fetch_data_url(&self, url: &str, timeout: Option<Duration>) -> Result<String> {
        let parsed = url::Url::parse(url)?;
        let mut request = self.client.get(parsed).header(ACCEPT, IMAGE_ACCEPT);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "{} replied {}",
                url,
                response.status()
            )));
        }
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(crate::inline::encode(&mime, &bytes))
    }
}

/// Resolves an image URL to inline bitmap data, directly or via the
/// privileged context.
pub struct ImageProxyFetcher {
    sender: MessageSender,
    page_fetch: Arc<dyn PageFetch>,
    surface: Arc<dyn Surface>,
    timeout: Option<Duration>,
    has_permission: OnceCell<bool>,
    warned: AtomicBool,
}

impl ImageProxyFetcher {
    pub fn new(
        sender: MessageSender,
        page_fetch: Arc<dyn PageFetch>,
        surface: Arc<dyn Surface>,
        timeout: Option<Duration>,
    ) -> Self {
        ImageProxyFetcher {
            sender,
            page_fetch,
            surface,
            timeout,
            has_permission: OnceCell::new(),
            warned: AtomicBool::new(false),
        }
    }

    /// Whether the broad host-permission grant is held. Queried once per
    /// fetcher; an unreachable privileged side counts as no grant.
    async fn permission_granted(&self) -> bool {
        *self
            .has_permission
            .get_or_init(|| async {
                let origins = PermissionSet::all_origins().origins;
                match self.sender.check_permissions(&origins).await {
                    Ok(granted) => granted,
                    Err(err) => {
                        warn!("permission check failed: {}", err);
                        false
                    }
                }
            })
            .await
    }

    /// Resolve `url` to inline image data, or `None` if the image cannot be
    /// fetched. Never fails.
    pub async fn fetch_image(&self, url: &str) -> Option<String> {
        if self.permission_granted().await {
            match self.page_fetch.fetch_data_url(url, self.timeout).await {
                Ok(data) => Some(data),
                Err(err) => {
                    warn!("direct image fetch failed for {}: {}", url, err);
                    self.warn_once();
                    None
                }
            }
        } else {
            match self.sender.fetch_image(url).await {
                Ok(data) => Some(data),
                Err(err) => {
                    warn!("proxied image fetch failed for {}: {}", url, err);
                    None
                }
            }
        }
    }

    /// Show the permission upsell at most once per fetcher, slightly
    /// deferred so the finished canvas is already on screen.
    fn warn_once(&self) {
        if self.warned.swap(true, Ordering::SeqCst) {
            return;
        }
        let surface = self.surface.clone();
        tokio::spawn(async move {
            tokio::time::sleep(WARNING_DELAY).await;
            surface.show_permission_warning();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingPageFetch, FakeSurface, StaticPageFetch};
    use tokio::sync::mpsc;

    fn closed_sender() -> MessageSender {
        let (tx, _rx) = mpsc::channel(1);
        MessageSender::new(1, tx)
    }

    #[tokio::test]
    async fn direct_failure_resolves_none_and_warns_once() {
        // Channel receiver dropped: the permission check errors out, but the
        // fetcher still must not fail.
        let surface = Arc::new(FakeSurface::new());
        let fetcher = ImageProxyFetcher::new(
            closed_sender(),
            Arc::new(FailingPageFetch),
            surface.clone(),
            None,
        );
        // No permission and no privileged side: both images resolve to None.
        assert_eq!(fetcher.fetch_image("https://a.example/x.png").await, None);
        assert_eq!(fetcher.fetch_image("https://a.example/y.png").await, None);
        // Relay path failures do not raise the upsell.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(surface.permission_warnings(), 0);
    }

    #[tokio::test]
    async fn granted_permission_uses_the_direct_path() {
        let surface = Arc::new(FakeSurface::new());
        let fetcher = ImageProxyFetcher::new(
            closed_sender(),
            Arc::new(StaticPageFetch::new("data:image/png;base64,AAAA")),
            surface,
            None,
        );
        // Pre-seed the grant so no channel round-trip is needed.
        fetcher.has_permission.set(true).unwrap();
        assert_eq!(
            fetcher.fetch_image("https://a.example/x.png").await,
            Some("data:image/png;base64,AAAA".to_string())
        );
    }

    #[tokio::test]
    async fn direct_fetch_failure_raises_one_debounced_warning() {
        let surface = Arc::new(FakeSurface::new());
        let fetcher = ImageProxyFetcher::new(
            closed_sender(),
            Arc::new(FailingPageFetch),
            surface.clone(),
            None,
        );
        fetcher.has_permission.set(true).unwrap();
        assert_eq!(fetcher.fetch_image("https://a.example/x.png").await, None);
        assert_eq!(fetcher.fetch_image("https://a.example/y.png").await, None);
        // Not yet visible before the debounce delay elapses.
        assert_eq!(surface.permission_warnings(), 0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(surface.permission_warnings(), 1);
    }
}
