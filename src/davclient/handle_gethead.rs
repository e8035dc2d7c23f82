use http::{HeaderMap, StatusCode};

use crate::body::ResponseStream;
use crate::davclient::{DavClient, HandlerFuture, ResponseHandler, StreamHandler};
use crate::transport::{DavRequest, DavResponse};
use crate::util::DavMethod;
use crate::DavResult;

/// Status and headers of a `HEAD`. Fails on 4xx/5xx.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadHandler;

impl ResponseHandler for HeadHandler {
    type Output = (StatusCode, HeaderMap);

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, (StatusCode, HeaderMap)> {
        Box::pin(async move {
            if resp.status.is_client_error() || resp.status.is_server_error() {
                return Err(resp.error());
            }
            Ok((resp.status, resp.headers))
        })
    }
}

impl DavClient {
    pub fn get_request(&self, url: &str, headers: &HeaderMap) -> DavRequest {
        let mut req = DavRequest::new(DavMethod::GET, url);
        for (name, value) in headers {
            req.headers.append(name, value.clone());
        }
        req
    }

    /// Body of `url`. 404 and 410 are `FileNotFound`.
    pub async fn get(&self, url: &str) -> DavResult<ResponseStream> {
        self.get_with_headers(url, &HeaderMap::new()).await
    }

    pub async fn get_with_headers(&self, url: &str, headers: &HeaderMap) -> DavResult<ResponseStream> {
        self.execute(self.get_request(url, headers), &StreamHandler)
            .await
    }

    pub async fn head(&self, url: &str) -> DavResult<(StatusCode, HeaderMap)> {
        self.execute(DavRequest::new(DavMethod::HEAD, url), &HeadHandler)
            .await
    }
}
