use http::header::{CONTENT_TYPE, EXPECT};
use http::{HeaderValue, StatusCode};

use crate::body::Body;
use crate::davclient::{DavClient, ResponseHandler, VoidHandler};
use crate::errors::DavError;
use crate::transport::DavRequest;
use crate::util::DavMethod;
use crate::DavResult;

impl DavClient {
    pub fn put_request(
        &self,
        url: &str,
        body: Body,
        content_type: Option<&str>,
        expect_continue: bool,
    ) -> DavResult<DavRequest> {
        let mut req = DavRequest::new(DavMethod::PUT, url).body(body);
        if let Some(ct) = content_type {
            let value = HeaderValue::from_str(ct)
                .map_err(|_| DavError::transport(format!("invalid content type {ct:?}")))?;
            req = req.header(CONTENT_TYPE, value);
        }
        if expect_continue {
            req = req.header(EXPECT, HeaderValue::from_static("100-continue"));
        }
        Ok(req)
    }

    /// Store `body` at `url`. On a 417 the request is sent once more
    /// without `Expect`, if the body can be replayed.
    pub async fn put(
        &self,
        url: &str,
        body: impl Into<Body>,
        content_type: Option<&str>,
        expect_continue: bool,
    ) -> DavResult<()> {
        let body = body.into();
        let spare = if expect_continue { body.try_clone() } else { None };
        let req = self.put_request(url, body, content_type, expect_continue)?;
        let resp = self.transport().execute(req).await?;
        if resp.status == StatusCode::EXPECTATION_FAILED {
            if let Some(body) = spare {
                debug!("{}: expectation failed, retrying without Expect", resp.url);
                drop(resp);
                let req = self.put_request(url, body, content_type, false)?;
                return self.execute(req, &VoidHandler).await;
            }
        }
        VoidHandler.handle(resp).await
    }
}
