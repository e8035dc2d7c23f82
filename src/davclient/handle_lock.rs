use http::{HeaderName, HeaderValue};

use crate::davclient::{DavClient, HandlerFuture, ResponseHandler, VoidHandler};
use crate::errors::DavError;
use crate::transport::{DavRequest, DavResponse};
use crate::util::DavMethod;
use crate::xml::{self, DavAce};
use crate::DavResult;

const LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
const IF: HeaderName = HeaderName::from_static("if");

/// The lock token of a `LOCK` response, from the body or else the
/// `Lock-Token` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockHandler;

impl ResponseHandler for LockHandler {
    type Output = String;

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, String> {
        Box::pin(async move {
            let resp = resp.error_for_status()?;
            let url = resp.url.clone();
            let header = resp
                .headers
                .get(LOCK_TOKEN)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string());
            let body = resp.bytes().await?;
            xml::parse_lock_token(&body)
                .or(header)
                .ok_or_else(|| DavError::transport(format!("{url}: no lock token in response")))
        })
    }
}

fn header_value(s: String) -> DavResult<HeaderValue> {
    HeaderValue::from_str(&s).map_err(|_| DavError::transport(format!("invalid header value {s:?}")))
}

impl DavClient {
    pub fn lock_request(&self, url: &str, owner: Option<&str>) -> DavResult<DavRequest> {
        Ok(DavRequest::new(DavMethod::LOCK, url).xml(xml::build_lockinfo(owner)?))
    }

    /// Take an exclusive write lock. A locked resource fails with 423.
    pub async fn lock(&self, url: &str) -> DavResult<String> {
        self.execute(self.lock_request(url, None)?, &LockHandler).await
    }

    /// Refresh the lock `token` that `file` holds.
    pub async fn refresh_lock(&self, url: &str, token: &str, file: &str) -> DavResult<String> {
        let req = DavRequest::new(DavMethod::LOCK, url).header(IF, header_value(format!("<{file}> (<{token}>)"))?);
        self.execute(req, &LockHandler).await
    }

    pub async fn unlock(&self, url: &str, token: &str) -> DavResult<()> {
        let req = DavRequest::new(DavMethod::UNLOCK, url).header(LOCK_TOKEN, header_value(format!("<{token}>"))?);
        self.execute(req, &VoidHandler).await
    }

    /// Replace the access control list. Protected and inherited entries
    /// are not sent.
    pub async fn set_acl(&self, url: &str, aces: &[DavAce]) -> DavResult<()> {
        let req = DavRequest::new(DavMethod::ACL, url).xml(xml::build_acl(aces)?);
        self.execute(req, &VoidHandler).await
    }
}
