use crate::davclient::{DavClient, VoidHandler};
use crate::transport::DavRequest;
use crate::util::DavMethod;
use crate::DavResult;

impl DavClient {
    pub async fn delete(&self, url: &str) -> DavResult<()> {
        self.execute(DavRequest::new(DavMethod::DELETE, url), &VoidHandler)
            .await
    }
}
