use crate::davclient::{DavClient, VoidHandler};
use crate::transport::DavRequest;
use crate::util::DavMethod;
use crate::DavResult;

impl DavClient {
    /// Create a collection. A missing parent is a `Conflict`, an existing
    /// resource a 405.
    pub async fn mkcol(&self, url: &str) -> DavResult<()> {
        self.execute(DavRequest::new(DavMethod::MKCOL, url), &VoidHandler)
            .await
    }
}
