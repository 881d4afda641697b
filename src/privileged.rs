//! The privileged context.
//!
//! Runs as a background task that owns the dispatch table, the per-tab
//! "capture in progress" guard, and the unrestricted HTTP client. It has no
//! DOM access; everything it does for the page side is a response to a
//! message. The guard is advisory state keyed by tab id, set when a session
//! is activated and cleared only by the page's `script-finished`
//! notification.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use log::debug;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::platform::{CaptureBackend, HostActions, PermissionBroker};
use crate::protocol::{
    Dispatcher, Envelope, HandlerError, Message, MessageKind, MessageSender, ResponseData,
};
use crate::{inline, TabId};

/// Capability backends the privileged context delegates to.
pub struct Backends {
    pub capture: Arc<dyn CaptureBackend>,
    pub permissions: Arc<dyn PermissionBroker>,
    pub host: Arc<dyn HostActions>,
}

/// Unrestricted fetch of an image URL, not subject to any page's origin
/// policy, returned as inline image data.
async fn proxy_fetch(client: &reqwest::Client, url: &str) -> std::result::Result<String, HandlerError> {
    let parsed =
        url::Url::parse(url).map_err(|e| HandlerError::Failed(format!("invalid url: {}", e)))?;
    let response = client.get(parsed).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(HandlerError::Upstream {
            message: format!("{} replied {}", url, status),
            status_code: Some(status.as_u16()),
        });
    }
    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = response.bytes().await?;
    Ok(inline::encode(&mime, &bytes))
}

/// The privileged context before it is spawned: all seven request kinds get
/// their handler registered here, so registration exclusivity is decided
/// before any message can arrive.
pub struct Background {
    dispatcher: Dispatcher,
    running: Arc<Mutex<HashSet<TabId>>>,
}

impl Background {
    pub fn new(backends: Backends) -> Result<Self> {
        let running: Arc<Mutex<HashSet<TabId>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut dispatcher = Dispatcher::new();
        let client = reqwest::Client::new();

        {
            let client = client.clone();
            dispatcher.register(MessageKind::FetchImage, move |message, _| {
                let client = client.clone();
                async move {
                    match message {
                        Message::FetchImage { url } => {
                            proxy_fetch(&client, &url).await.map(ResponseData::Image)
                        }
                        _ => Err(HandlerError::Failed("malformed fetch-image payload".into())),
                    }
                }
                .boxed()
            })?;
        }

        {
            let running = running.clone();
            dispatcher.register(MessageKind::ScriptFinished, move |message, _| {
                let running = running.clone();
                async move {
                    if let Message::ScriptFinished { tab_id } = message {
                        running.lock().unwrap().remove(&tab_id);
                        debug!("running guard cleared for tab {}", tab_id);
                    }
                    Ok(ResponseData::None)
                }
                .boxed()
            })?;
        }

        dispatcher.register(MessageKind::GetTabId, |_, tab_id| {
            async move { Ok(ResponseData::TabId(tab_id)) }.boxed()
        })?;

        {
            let permissions = backends.permissions.clone();
            dispatcher.register(MessageKind::CheckPermissions, move |message, _| {
                let permissions = permissions.clone();
                async move {
                    match message {
                        Message::CheckPermissions { origins } => {
                            Ok(ResponseData::Bool(permissions.contains(&origins).await))
                        }
                        _ => Err(HandlerError::Failed(
                            "malformed check-permissions payload".into(),
                        )),
                    }
                }
                .boxed()
            })?;
        }

        {
            let permissions = backends.permissions.clone();
            dispatcher.register(MessageKind::RequestPermissions, move |message, _| {
                let permissions = permissions.clone();
                async move {
                    match message {
                        Message::RequestPermissions(set) => {
                            Ok(ResponseData::Bool(permissions.request(&set).await))
                        }
                        _ => Err(HandlerError::Failed(
                            "malformed request-permissions payload".into(),
                        )),
                    }
                }
                .boxed()
            })?;
        }

        {
            let host = backends.host.clone();
            dispatcher.register(MessageKind::ShowOptions, move |_, _| {
                let host = host.clone();
                async move {
                    host.show_options().await?;
                    Ok(ResponseData::None)
                }
                .boxed()
            })?;
        }

        {
            let capture = backends.capture.clone();
            dispatcher.register(MessageKind::CaptureVisibleTab, move |_, _| {
                let capture = capture.clone();
                async move { capture.capture_visible().await.map(ResponseData::Image) }.boxed()
            })?;
        }

        Ok(Background {
            dispatcher,
            running,
        })
    }

    /// Start the message loop. Requests are answered in arrival order; the
    /// channel makes no ordering promise across distinct requests beyond
    /// that.
    pub fn spawn(self) -> BackgroundHandle {
        let (tx, mut rx) = mpsc::channel::<Envelope>(32);
        let running = self.running;
        let dispatcher = self.dispatcher;
        let task = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let response = dispatcher.dispatch(envelope.message, envelope.tab_id).await;
                let _ = envelope.reply.send(response);
            }
            debug!("privileged context stopped");
        });
        BackgroundHandle { tx, running, task }
    }
}

/// Handle to the running privileged context.
pub struct BackgroundHandle {
    tx: mpsc::Sender<Envelope>,
    running: Arc<Mutex<HashSet<TabId>>>,
    task: tokio::task::JoinHandle<()>,
}

impl BackgroundHandle {
    /// Mint a restricted-side sender bound to a tab.
    pub fn connect(&self, tab_id: TabId) -> MessageSender {
        MessageSender::new(tab_id, self.tx.clone())
    }

    /// Mark a session as running on `tab_id`, as the host does when the user
    /// gesture fires. Returns `false` while the guard is already set: the
    /// second trigger is a no-op and no second session may start until
    /// `script-finished` clears the guard.
    pub fn activate(&self, tab_id: TabId) -> bool {
        self.running.lock().unwrap().insert(tab_id)
    }

    pub fn is_running(&self, tab_id: TabId) -> bool {
        self.running.lock().unwrap().contains(&tab_id)
    }

    /// End the privileged context's lifecycle. Outstanding and future sends
    /// fail with a channel-closed error.
    pub fn shutdown(self) {
        self.task.abort();
    }
}
