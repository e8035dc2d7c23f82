use http::HeaderValue;

use crate::davclient::{DavClient, VoidHandler};
use crate::errors::DavError;
use crate::transport::DavRequest;
use crate::util::DavMethod;
use crate::DavResult;

impl DavClient {
    pub fn copymove_request(
        &self,
        method: DavMethod,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> DavResult<DavRequest> {
        let dest = self.absolute(dst)?;
        let dest = HeaderValue::from_str(&dest).map_err(|_| DavError::InvalidUrl(dest.clone()))?;
        let overwrite = HeaderValue::from_static(if overwrite { "T" } else { "F" });
        Ok(DavRequest::new(method, src)
            .header(http::HeaderName::from_static("destination"), dest)
            .header(http::HeaderName::from_static("overwrite"), overwrite))
    }

    /// With `overwrite` false an existing destination fails with 412.
    pub async fn move_(&self, src: &str, dst: &str, overwrite: bool) -> DavResult<()> {
        let req = self.copymove_request(DavMethod::MOVE, src, dst, overwrite)?;
        self.execute(req, &VoidHandler).await
    }

    pub async fn copy(&self, src: &str, dst: &str, overwrite: bool) -> DavResult<()> {
        let req = self.copymove_request(DavMethod::COPY, src, dst, overwrite)?;
        self.execute(req, &VoidHandler).await
    }
}
