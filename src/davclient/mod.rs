//
// This module contains the protocol client, DavClient.
//
// Every verb has a request builder (`*_request`) and a convenience method
// that runs it through one of the response handlers below. Any other
// `ResponseHandler` can be used with `DavClient::execute`.
//
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::{Future, FutureExt};
use http::{HeaderName, HeaderValue, StatusCode};

use crate::body::ResponseStream;
use crate::errors::DavError;
use crate::filename::Href;
use crate::resource::DavResource;
use crate::transport::{DavRequest, DavResponse, Transport};
use crate::xml::{self, element_qname, element_text, QName};
use crate::DavResult;

pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_gethead;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;
pub mod handle_version;

pub use handle_options::DavOptions;

pub(crate) const DEPTH: HeaderName = HeaderName::from_static("depth");

/// Future returned by a [`ResponseHandler`].
pub type HandlerFuture<'a, T> = Pin<Box<dyn Future<Output = DavResult<T>> + Send + 'a>>;

/// Turns a response into a value.
pub trait ResponseHandler: Send + Sync {
    type Output: Send;

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, Self::Output>;
}

/// Value of the `Depth` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    /// Infinity, or whatever maximum the server allows.
    Infinity,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }

    pub(crate) fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

/// Succeeds on 2xx, nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidHandler;

impl ResponseHandler for VoidHandler {
    type Output = ();

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, ()> {
        async move {
            resp.error_for_status()?;
            Ok(())
        }
        .boxed()
    }
}

/// Just the status, whatever it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusHandler;

impl ResponseHandler for StatusHandler {
    type Output = StatusCode;

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, StatusCode> {
        async move { Ok(resp.status) }.boxed()
    }
}

/// The body of a successful response, as a stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamHandler;

impl ResponseHandler for StreamHandler {
    type Output = ResponseStream;

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, ResponseStream> {
        async move { Ok(resp.error_for_status()?.body) }.boxed()
    }
}

/// 2xx is true, 404/410 is false.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistsHandler;

impl ResponseHandler for ExistsHandler {
    type Output = bool;

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, bool> {
        async move {
            match resp.status {
                s if s.is_success() => Ok(true),
                StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
                _ => Err(resp.error()),
            }
        }
        .boxed()
    }
}

// body of a successful multistatus-carrying response.
async fn multistatus(resp: DavResponse) -> DavResult<Vec<xml::PropResponse>> {
    let resp = resp.error_for_status()?;
    let status = resp.status;
    let url = resp.url.clone();
    let body = resp.bytes().await?;
    if status != StatusCode::MULTI_STATUS && body.is_empty() {
        return Ok(Vec::new());
    }
    xml::parse_multistatus(&body).map_err(|e| match e {
        DavError::Transport { message, source } => DavError::Transport {
            message: format!("{url}: {} {}: {message}", status.as_u16(), status.canonical_reason().unwrap_or("")),
            source,
        },
        other => other,
    })
}

/// Resources from a multistatus body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourcesHandler;

impl ResponseHandler for ResourcesHandler {
    type Output = Vec<DavResource>;

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, Vec<DavResource>> {
        async move {
            Ok(multistatus(resp)
                .await?
                .into_iter()
                .map(DavResource::from_response)
                .collect())
        }
        .boxed()
    }
}

/// Properties of one resource, every value as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropMap {
    pub href: Href,
    pub props: HashMap<QName, String>,
}

/// Property maps from a multistatus body.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesHandler;

impl ResponseHandler for PropertiesHandler {
    type Output = Vec<PropMap>;

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, Vec<PropMap>> {
        async move {
            Ok(multistatus(resp)
                .await?
                .into_iter()
                .map(|r| PropMap {
                    href: r.href,
                    props: r
                        .props
                        .iter()
                        .map(|e| (element_qname(e), element_text(e)))
                        .collect(),
                })
                .collect())
        }
        .boxed()
    }
}

/// Protocol client. Cheap to clone; clones share the transport.
#[derive(Debug, Clone)]
pub struct DavClient {
    transport: Arc<Transport>,
}

impl DavClient {
    pub fn new(transport: Arc<Transport>) -> DavClient {
        DavClient { transport }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Send any request and feed the response to `handler`.
    pub async fn execute<H: ResponseHandler>(&self, req: DavRequest, handler: &H) -> DavResult<H::Output> {
        self.transport.execute_with(req, handler).await
    }

    /// Absolute wire URL of `url`, as used in `Destination` headers.
    pub(crate) fn absolute(&self, url: &str) -> DavResult<String> {
        Ok(self.transport.resolve(url)?.to_string())
    }

    pub fn shutdown(&self) {
        self.transport.shutdown();
    }
}
