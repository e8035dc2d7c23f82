use http::header::ALLOW;

use crate::davclient::{DavClient, HandlerFuture, ResponseHandler};
use crate::transport::{DavRequest, DavResponse};
use crate::util::{DavMethod, DavMethodSet};
use crate::DavResult;

/// What a server said in reply to `OPTIONS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavOptions {
    /// Compliance classes from the `DAV` header, e.g. `1`, `2`, `version-control`.
    pub classes: Vec<String>,
    pub allow: DavMethodSet,
}

impl DavOptions {
    pub fn supports_versioning(&self) -> bool {
        self.classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case("version-control"))
    }

    pub fn is_dav(&self) -> bool {
        !self.classes.is_empty()
    }
}

/// Parses the `DAV` and `Allow` headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsHandler;

impl ResponseHandler for OptionsHandler {
    type Output = DavOptions;

    fn handle(&self, resp: DavResponse) -> HandlerFuture<'_, DavOptions> {
        Box::pin(async move {
            let resp = resp.error_for_status()?;
            let classes = resp
                .headers
                .get_all("dav")
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            let allow = resp
                .headers
                .get_all(ALLOW)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .fold(DavMethodSet::none(), |mut set, v| {
                    set.extend(DavMethodSet::from_allow(v));
                    set
                });
            Ok(DavOptions { classes, allow })
        })
    }
}

impl DavClient {
    pub async fn options(&self, url: &str) -> DavResult<DavOptions> {
        self.execute(DavRequest::new(DavMethod::OPTIONS, url), &OptionsHandler)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ResponseStream;
    use http::{HeaderMap, HeaderValue, StatusCode};

    #[tokio::test]
    async fn classes_and_allow() {
        let mut headers = HeaderMap::new();
        headers.append("dav", HeaderValue::from_static("1, 2"));
        headers.append("dav", HeaderValue::from_static("version-control,checkout-in-place"));
        headers.append(ALLOW, HeaderValue::from_static("OPTIONS, PROPFIND, CHECKIN"));
        headers.append(ALLOW, HeaderValue::from_static("VERSION-CONTROL"));
        let resp = DavResponse {
            status: StatusCode::OK,
            headers,
            url: "http://h/".to_string(),
            body: ResponseStream::empty(),
        };
        let opts = OptionsHandler.handle(resp).await.unwrap();
        assert_eq!(opts.classes, vec!["1", "2", "version-control", "checkout-in-place"]);
        assert!(opts.supports_versioning());
        assert!(opts.allow.contains(DavMethod::CHECKIN));
        assert!(opts.allow.contains(DavMethod::VERSION_CONTROL));
        assert!(!opts.allow.contains(DavMethod::PUT));
    }
}
