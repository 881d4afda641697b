//! Cross-context message protocol.
//!
//! The restricted (page) context and the privileged context never share
//! memory; every interaction is a typed request/response round-trip over an
//! asynchronous channel. Each [`Message`] names one of a fixed, closed set of
//! request kinds; each request yields exactly one [`Response`], delivered
//! through a oneshot reply slot carried alongside the message.
//!
//! Dispatch on the privileged side goes through a [`Dispatcher`]: exactly one
//! handler per kind, errors (and panics) caught at the dispatch boundary and
//! turned into `Response::Err` so handlers never need their own error-to-wire
//! translation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::future::{BoxFuture, FutureExt};
use log::error;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::TabId;

/// The closed set of recognized request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    FetchImage,
    ScriptFinished,
    GetTabId,
    CheckPermissions,
    RequestPermissions,
    ShowOptions,
    CaptureVisibleTab,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::FetchImage => "fetch-image",
            MessageKind::ScriptFinished => "script-finished",
            MessageKind::GetTabId => "get-tab-id",
            MessageKind::CheckPermissions => "check-permissions",
            MessageKind::RequestPermissions => "request-permissions",
            MessageKind::ShowOptions => "show-options",
            MessageKind::CaptureVisibleTab => "capture-visible-tab",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origins and/or named permissions named by a permission request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl PermissionSet {
    /// The broad host-permission grant the image fetcher relies on.
    pub fn all_origins() -> Self {
        PermissionSet {
            origins: vec!["*://*/".to_string()],
            permissions: Vec::new(),
        }
    }
}

/// A request envelope: one kind, one kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum Message {
    FetchImage { url: String },
    ScriptFinished { tab_id: TabId },
    GetTabId,
    CheckPermissions { origins: Vec<String> },
    RequestPermissions(PermissionSet),
    ShowOptions,
    CaptureVisibleTab,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::FetchImage { .. } => MessageKind::FetchImage,
            Message::ScriptFinished { .. } => MessageKind::ScriptFinished,
            Message::GetTabId => MessageKind::GetTabId,
            Message::CheckPermissions { .. } => MessageKind::CheckPermissions,
            Message::RequestPermissions(_) => MessageKind::RequestPermissions,
            Message::ShowOptions => MessageKind::ShowOptions,
            Message::CaptureVisibleTab => MessageKind::CaptureVisibleTab,
        }
    }
}

/// Kind-specific response data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    None,
    Bool(bool),
    TabId(TabId),
    /// Inline image data (a data-URL string)
    Image(String),
}

/// The error half of the response union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Every request yields exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok(ResponseData),
    Err(WireError),
}

/// Error type for handler bodies. Converted to a [`WireError`] at the
/// dispatch boundary; handlers just `?` their failures.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// An upstream request failed, optionally with an HTTP status
    #[error("{message}")]
    Upstream {
        message: String,
        status_code: Option<u16>,
    },

    /// Any other handler failure
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    fn into_wire(self) -> WireError {
        match self {
            HandlerError::Upstream {
                message,
                status_code,
            } => WireError {
                message,
                status_code,
                details: None,
            },
            HandlerError::Failed(message) => WireError {
                message,
                status_code: None,
                details: None,
            },
        }
    }
}

impl From<reqwest::Error> for HandlerError {
    fn from(err: reqwest::Error) -> Self {
        HandlerError::Upstream {
            status_code: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

pub(crate) struct Envelope {
    pub message: Message,
    pub tab_id: TabId,
    pub reply: oneshot::Sender<Response>,
}

/// Restricted-side handle for sending requests to the privileged context.
///
/// Cloneable; each clone is bound to the tab it was minted for, so the
/// privileged side always knows which tab a request came from.
#[derive(Clone)]
pub struct MessageSender {
    tab_id: TabId,
    tx: mpsc::Sender<Envelope>,
}

impl MessageSender {
    pub(crate) fn new(tab_id: TabId, tx: mpsc::Sender<Envelope>) -> Self {
        MessageSender { tab_id, tx }
    }

    /// Send a request and wait for its response.
    ///
    /// Fails with [`Error::ChannelClosed`] when the privileged side is
    /// unreachable, and with [`Error::Response`] when the reply is an error.
    pub async fn send(&self, message: Message) -> Result<ResponseData> {
        let (reply, rx) = oneshot::channel();
        let envelope = Envelope {
            message,
            tab_id: self.tab_id,
            reply,
        };
        self.tx
            .send(envelope)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        match rx.await.map_err(|_| Error::ChannelClosed)? {
            Response::Ok(data) => Ok(data),
            Response::Err(err) => Err(Error::Response {
                message: err.message,
                status_code: err.status_code,
            }),
        }
    }

    // Typed senders mirroring the request table.

    pub async fn fetch_image(&self, url: &str) -> Result<String> {
        match self
            .send(Message::FetchImage {
                url: url.to_string(),
            })
            .await?
        {
            ResponseData::Image(data) => Ok(data),
            other => Err(unexpected("fetch-image", &other)),
        }
    }

    pub async fn script_finished(&self, tab_id: TabId) -> Result<()> {
        self.send(Message::ScriptFinished { tab_id }).await?;
        Ok(())
    }

    pub async fn tab_id(&self) -> Result<TabId> {
        match self.send(Message::GetTabId).await? {
            ResponseData::TabId(id) => Ok(id),
            other => Err(unexpected("get-tab-id", &other)),
        }
    }

    pub async fn check_permissions(&self, origins: &[String]) -> Result<bool> {
        match self
            .send(Message::CheckPermissions {
                origins: origins.to_vec(),
            })
            .await?
        {
            ResponseData::Bool(granted) => Ok(granted),
            other => Err(unexpected("check-permissions", &other)),
        }
    }

    pub async fn request_permissions(&self, set: PermissionSet) -> Result<bool> {
        match self.send(Message::RequestPermissions(set)).await? {
            ResponseData::Bool(granted) => Ok(granted),
            other => Err(unexpected("request-permissions", &other)),
        }
    }

    pub async fn show_options(&self) -> Result<()> {
        self.send(Message::ShowOptions).await?;
        Ok(())
    }

    pub async fn capture_visible_tab(&self) -> Result<String> {
        match self.send(Message::CaptureVisibleTab).await? {
            ResponseData::Image(data) => Ok(data),
            other => Err(unexpected("capture-visible-tab", &other)),
        }
    }
}

fn unexpected(kind: &str, data: &ResponseData) -> Error {
    Error::UnexpectedResponse(format!("{} replied with {:?}", kind, data))
}

/// Boxed future returned by a registered handler.
pub type HandlerFuture = BoxFuture<'static, std::result::Result<ResponseData, HandlerError>>;

type HandlerFn = Box<dyn Fn(Message, TabId) -> HandlerFuture + Send + Sync>;

/// Privileged-side dispatch table.
///
/// Registration is exclusive per kind, which is the only thing preventing two
/// handlers for the same kind from racing.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<MessageKind, HandlerFn>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::default()
    }

    /// Register the handler for one kind. A synchronous handler simply
    /// returns an already-ready future; the reply channel treats both the
    /// same.
    pub fn register<F>(&mut self, kind: MessageKind, handler: F) -> Result<()>
    where
        F: Fn(Message, TabId) -> HandlerFuture + Send + Sync + 'static,
    {
        if self.handlers.contains_key(&kind) {
            return Err(Error::DuplicateHandler(kind.to_string()));
        }
        self.handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    /// Dispatch one message and produce its response. Never panics and never
    /// returns early: unknown kinds, handler errors and handler panics all
    /// come back as `Response::Err`.
    pub async fn dispatch(&self, message: Message, tab_id: TabId) -> Response {
        let kind = message.kind();
        let handler = match self.handlers.get(&kind) {
            Some(h) => h,
            None => {
                error!("no handler registered for {}", kind);
                return Response::Err(WireError {
                    message: format!("unsupported request kind: {}", kind),
                    status_code: None,
                    details: None,
                });
            }
        };
        let fut = handler(message, tab_id);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(data)) => Response::Ok(data),
            Ok(Err(err)) => {
                error!("handler for {} failed: {}", kind, err);
                Response::Err(err.into_wire())
            }
            Err(_) => {
                error!("handler for {} panicked", kind);
                Response::Err(WireError {
                    message: format!("handler for {} panicked", kind),
                    status_code: None,
                    details: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender_pair(buffer: usize) -> (MessageSender, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        (MessageSender::new(7, tx), rx)
    }

    #[tokio::test]
    async fn dispatch_without_handler_is_an_error_response() {
        let dispatcher = Dispatcher::new();
        let resp = dispatcher.dispatch(Message::GetTabId, 1).await;
        match resp {
            Response::Err(err) => {
                assert!(err.message.contains("unsupported request kind"));
                assert!(err.message.contains("get-tab-id"));
            }
            Response::Ok(_) => panic!("expected error response"),
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(MessageKind::GetTabId, |_, tab| {
                async move { Ok(ResponseData::TabId(tab)) }.boxed()
            })
            .unwrap();
        let err = dispatcher
            .register(MessageKind::GetTabId, |_, _| {
                async { Ok(ResponseData::None) }.boxed()
            })
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateHandler(_)));
    }

    #[tokio::test]
    async fn handler_errors_become_error_responses_with_status() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(MessageKind::FetchImage, |_, _| {
                async {
                    Err(HandlerError::Upstream {
                        message: "not found".into(),
                        status_code: Some(404),
                    })
                }
                .boxed()
            })
            .unwrap();
        let resp = dispatcher
            .dispatch(
                Message::FetchImage {
                    url: "https://example.com/x.png".into(),
                },
                1,
            )
            .await;
        match resp {
            Response::Err(err) => {
                assert_eq!(err.message, "not found");
                assert_eq!(err.status_code, Some(404));
            }
            Response::Ok(_) => panic!("expected error response"),
        }
    }

    #[tokio::test]
    async fn handler_panics_are_caught_at_the_boundary() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(MessageKind::ShowOptions, |_, _| {
                async { panic!("boom") }.boxed()
            })
            .unwrap();
        let resp = dispatcher.dispatch(Message::ShowOptions, 1).await;
        assert!(matches!(resp, Response::Err(_)));
    }

    #[tokio::test]
    async fn send_fails_with_channel_closed_when_receiver_is_gone() {
        let (sender, rx) = sender_pair(1);
        drop(rx);
        let err = sender.send(Message::GetTabId).await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[tokio::test]
    async fn envelope_carries_the_sender_tab_id() {
        let (sender, mut rx) = sender_pair(1);
        let task = tokio::spawn(async move {
            let env = rx.recv().await.unwrap();
            assert_eq!(env.tab_id, 7);
            let _ = env.reply.send(Response::Ok(ResponseData::TabId(env.tab_id)));
        });
        assert_eq!(sender.tab_id().await.unwrap(), 7);
        task.await.unwrap();
    }

    #[test]
    fn message_wire_shape_uses_kebab_case_kinds() {
        let msg = Message::FetchImage {
            url: "https://example.com/a.png".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "fetch-image");
        assert_eq!(json["payload"]["url"], "https://example.com/a.png");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), MessageKind::FetchImage);
    }
}
