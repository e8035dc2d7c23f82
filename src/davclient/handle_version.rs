use http::StatusCode;

use crate::davclient::{DavClient, HandlerFuture, ResponseHandler, StatusHandler};
use crate::errors::DavError;
use crate::transport::{DavRequest, DavResponse};
use crate::util::DavMethod;
use crate::DavResult;

/// Like `VoidHandler`, but 405 and 501 mean the resource is not under
/// version control.
#[derive(Debug, Clone, Copy)]
pub struct VersionHandler(pub DavMethod);

impl ResponseHandler for VersionHandler {
    type Output = ();

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            match resp.status {
                s if s.is_success() => Ok(()),
                StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => Err(
                    DavError::not_supported(resp.url.clone(), format!("{} ({})", self.0.as_str(), resp.status)),
                ),
                _ => Err(resp.error()),
            }
        })
    }
}

impl DavClient {
    async fn version_verb(&self, method: DavMethod, url: &str) -> DavResult<()> {
        self.execute(DavRequest::new(method, url), &VersionHandler(method))
            .await
    }

    /// Put `url` under version control. True if the server said 2xx;
    /// errors are not reported.
    pub async fn version_control(&self, url: &str) -> bool {
        match self
            .execute(DavRequest::new(DavMethod::VERSION_CONTROL, url), &StatusHandler)
            .await
        {
            Ok(status) => status.is_success(),
            Err(e) => {
                debug!("VERSION-CONTROL {}: {}", url, e);
                false
            }
        }
    }

    pub async fn checkout(&self, url: &str) -> DavResult<()> {
        self.version_verb(DavMethod::CHECKOUT, url).await
    }

    pub async fn uncheckout(&self, url: &str) -> DavResult<()> {
        self.version_verb(DavMethod::UNCHECKOUT, url).await
    }

    pub async fn checkin(&self, url: &str) -> DavResult<()> {
        self.version_verb(DavMethod::CHECKIN, url).await
    }
}
