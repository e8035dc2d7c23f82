//! Remote files on top of the protocol client.
//!
//! A [`DavFileSystem`] owns the transport for one authority and hands
//! out [`DavFile`] objects. Files talk to the server through the
//! [`DavProtocol`] trait, which [`DavClient`] implements; tests can plug
//! in anything else.

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};

use crate::body::ResponseStream;
use crate::davclient::{DavClient, Depth};
use crate::filename::{FileName, FileType, NameScope};
use crate::resource::DavResource;
use crate::transport::config::TransportConfig;
use crate::transport::Transport;
use crate::xml::QName;
use crate::DavResult;

mod file;
mod writer;

pub use file::{ContentInfo, DavFile};
pub use writer::DavWriter;

/// Future returned by [`DavProtocol`] methods.
pub type FsFuture<'a, T> = BoxFuture<'a, DavResult<T>>;

/// The verbs a [`DavFile`] needs.
pub trait DavProtocol: Debug + Send + Sync {
    fn list<'a>(
        &'a self,
        url: &'a str,
        depth: Depth,
        allprop: bool,
        props: &'a [QName],
    ) -> FsFuture<'a, Vec<DavResource>>;

    fn exists<'a>(&'a self, url: &'a str) -> FsFuture<'a, bool>;

    fn get<'a>(&'a self, url: &'a str) -> FsFuture<'a, ResponseStream>;

    fn put<'a>(&'a self, url: &'a str, body: Bytes, content_type: Option<&'a str>) -> FsFuture<'a, ()>;

    fn delete<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()>;

    fn mkcol<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()>;

    fn move_<'a>(&'a self, src: &'a str, dst: &'a str, overwrite: bool) -> FsFuture<'a, ()>;

    fn copy<'a>(&'a self, src: &'a str, dst: &'a str, overwrite: bool) -> FsFuture<'a, ()>;

    fn patch<'a>(
        &'a self,
        url: &'a str,
        set: &'a [(QName, String)],
        remove: &'a [QName],
    ) -> FsFuture<'a, ()>;

    /// True if the server answered 2xx.
    fn version_control<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool>;

    fn checkout<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()>;

    fn uncheckout<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()>;

    fn checkin<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()>;

    /// Release connections. Idempotent.
    fn shutdown(&self) {}
}

impl DavProtocol for DavClient {
    fn list<'a>(
        &'a self,
        url: &'a str,
        depth: Depth,
        allprop: bool,
        props: &'a [QName],
    ) -> FsFuture<'a, Vec<DavResource>> {
        DavClient::list(self, url, depth, allprop, props).boxed()
    }

    fn exists<'a>(&'a self, url: &'a str) -> FsFuture<'a, bool> {
        DavClient::exists(self, url).boxed()
    }

    fn get<'a>(&'a self, url: &'a str) -> FsFuture<'a, ResponseStream> {
        DavClient::get(self, url).boxed()
    }

    fn put<'a>(&'a self, url: &'a str, body: Bytes, content_type: Option<&'a str>) -> FsFuture<'a, ()> {
        DavClient::put(self, url, body, content_type, false).boxed()
    }

    fn delete<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
        DavClient::delete(self, url).boxed()
    }

    fn mkcol<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
        DavClient::mkcol(self, url).boxed()
    }

    fn move_<'a>(&'a self, src: &'a str, dst: &'a str, overwrite: bool) -> FsFuture<'a, ()> {
        DavClient::move_(self, src, dst, overwrite).boxed()
    }

    fn copy<'a>(&'a self, src: &'a str, dst: &'a str, overwrite: bool) -> FsFuture<'a, ()> {
        DavClient::copy(self, src, dst, overwrite).boxed()
    }

    fn patch<'a>(
        &'a self,
        url: &'a str,
        set: &'a [(QName, String)],
        remove: &'a [QName],
    ) -> FsFuture<'a, ()> {
        async move {
            DavClient::patch(self, url, set, remove).await?;
            Ok(())
        }
        .boxed()
    }

    fn version_control<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool> {
        DavClient::version_control(self, url).boxed()
    }

    fn checkout<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
        DavClient::checkout(self, url).boxed()
    }

    fn uncheckout<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
        DavClient::uncheckout(self, url).boxed()
    }

    fn checkin<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
        DavClient::checkin(self, url).boxed()
    }

    fn shutdown(&self) {
        DavClient::shutdown(self);
    }
}

/// Options of a [`DavFileSystem`].
#[derive(Debug, Clone, Default)]
pub struct FileSystemOptions {
    pub(crate) versioning: bool,
    pub(crate) creator_name: Option<String>,
    pub(crate) transport: TransportConfig,
}

impl FileSystemOptions {
    pub fn new() -> FileSystemOptions {
        FileSystemOptions::default()
    }

    /// Check resources out and in around writes.
    pub fn versioning(self, versioning: bool) -> Self {
        let mut this = self;
        this.versioning = versioning;
        this
    }

    /// Name recorded as `creator-displayname` after a write. Defaults to
    /// the user in the URL.
    pub fn creator_name(self, name: impl Into<String>) -> Self {
        let mut this = self;
        this.creator_name = Some(name.into());
        this
    }

    pub fn transport(self, config: TransportConfig) -> Self {
        let mut this = self;
        this.transport = config;
        this
    }

    pub fn is_versioning(&self) -> bool {
        self.versioning
    }
}

#[derive(Debug)]
pub(crate) struct FsInner {
    pub(crate) root: FileName,
    pub(crate) options: FileSystemOptions,
    pub(crate) protocol: Arc<dyn DavProtocol>,
}

/// A WebDAV server, seen from one root URL.
#[derive(Debug, Clone)]
pub struct DavFileSystem {
    inner: Arc<FsInner>,
}

impl DavFileSystem {
    /// Build the transport for the authority of `url` and check that the
    /// server answers. A failed check is only logged.
    pub async fn connect(url: &str, options: FileSystemOptions) -> DavResult<DavFileSystem> {
        let root = FileName::parse(url)?;
        let transport = Transport::new(&root, options.transport.clone())?;
        let client = DavClient::new(Arc::new(transport));
        match client.options(&root.path_query()).await {
            Ok(opts) => debug!("connected to {}, DAV classes {:?}", root, opts.classes),
            Err(e) => warn!("connection test on {} failed: {}", root, e),
        }
        Ok(DavFileSystem::with_protocol(root, options, Arc::new(client)))
    }

    pub fn with_protocol(
        root: FileName,
        options: FileSystemOptions,
        protocol: Arc<dyn DavProtocol>,
    ) -> DavFileSystem {
        DavFileSystem {
            inner: Arc::new(FsInner {
                root,
                options,
                protocol,
            }),
        }
    }

    pub fn root_name(&self) -> &FileName {
        &self.inner.root
    }

    pub fn options(&self) -> &FileSystemOptions {
        &self.inner.options
    }

    pub fn root_file(&self) -> DavFile {
        self.file(self.inner.root.clone())
    }

    pub fn file(&self, name: FileName) -> DavFile {
        DavFile::new(name, self.inner.clone())
    }

    /// A file by absolute URL, absolute path, or path relative to the root.
    /// URLs and absolute paths are taken as encoded; relative paths are
    /// plain names.
    pub fn resolve(&self, path: &str) -> DavResult<DavFile> {
        let name = if path.contains("://") {
            FileName::parse(path)?
        } else if path.starts_with('/') {
            let kind = if path.len() > 1 && path.ends_with('/') {
                FileType::Folder
            } else {
                FileType::FileOrFolder
            };
            self.inner.root.with_path_and_type(path, kind)?
        } else {
            self.inner.root.child(path, NameScope::Descendent)?
        };
        Ok(self.file(name))
    }

    /// Shut the transport down. Files of this file system stop working.
    pub fn close(&self) {
        self.inner.protocol.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! A recording [`DavProtocol`] with scripted answers.

    use std::collections::VecDeque;

    use http::StatusCode;
    use parking_lot::Mutex;

    use super::*;
    use crate::errors::DavError;
    use crate::filename::Href;
    use crate::xml::{parse_multistatus, PropResponse};

    #[derive(Debug)]
    pub(crate) enum Answer {
        Ok,
        Status(StatusCode),
        Resources(Vec<DavResource>),
        Body(&'static str),
        Bool(bool),
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakeProtocol {
        pub calls: Mutex<Vec<String>>,
        answers: Mutex<VecDeque<Answer>>,
    }

    pub(crate) fn resource(href: &str, props: &str) -> DavResource {
        let xml = format!(
            r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>{href}</D:href>
            <D:propstat><D:prop>{props}</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>
            </D:response></D:multistatus>"#
        );
        let mut parsed: Vec<PropResponse> = parse_multistatus(xml.as_bytes()).unwrap();
        DavResource::from_response(parsed.remove(0))
    }

    pub(crate) fn bare(href: &str) -> DavResource {
        DavResource::from_response(PropResponse {
            href: Href::parse(href).unwrap(),
            status: None,
            props: Vec::new(),
        })
    }

    impl FakeProtocol {
        pub fn new(answers: Vec<Answer>) -> Arc<FakeProtocol> {
            Arc::new(FakeProtocol {
                calls: Mutex::new(Vec::new()),
                answers: Mutex::new(answers.into()),
            })
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn next(&self, call: String) -> Answer {
            self.calls.lock().push(call);
            self.answers.lock().pop_front().unwrap_or(Answer::Ok)
        }

        fn unit(&self, call: String, url: &str) -> DavResult<()> {
            match self.next(call) {
                Answer::Status(s) => Err(DavError::from_status(s, url)),
                _ => Ok(()),
            }
        }
    }

    impl DavProtocol for FakeProtocol {
        fn list<'a>(
            &'a self,
            url: &'a str,
            depth: Depth,
            _allprop: bool,
            props: &'a [QName],
        ) -> FsFuture<'a, Vec<DavResource>> {
            let call = format!(
                "PROPFIND {} depth={} {}",
                url,
                depth.as_str(),
                props.iter().map(|p| p.local_name.as_str()).collect::<Vec<_>>().join(",")
            );
            let r = match self.next(call) {
                Answer::Resources(r) => Ok(r),
                Answer::Status(s) => Err(DavError::from_status(s, url)),
                _ => Ok(Vec::new()),
            };
            async move { r }.boxed()
        }

        fn exists<'a>(&'a self, url: &'a str) -> FsFuture<'a, bool> {
            let r = match self.next(format!("EXISTS {url}")) {
                Answer::Bool(b) => Ok(b),
                Answer::Status(s) => Err(DavError::from_status(s, url)),
                _ => Ok(true),
            };
            async move { r }.boxed()
        }

        fn get<'a>(&'a self, url: &'a str) -> FsFuture<'a, ResponseStream> {
            let r = match self.next(format!("GET {url}")) {
                Answer::Body(b) => Ok(ResponseStream::from_bytes(b)),
                Answer::Status(s) => Err(DavError::from_status(s, url)),
                _ => Ok(ResponseStream::empty()),
            };
            async move { r }.boxed()
        }

        fn put<'a>(&'a self, url: &'a str, body: Bytes, _ct: Option<&'a str>) -> FsFuture<'a, ()> {
            let call = format!("PUT {} {}", url, String::from_utf8_lossy(&body));
            let r = self.unit(call, url);
            async move { r }.boxed()
        }

        fn delete<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
            let r = self.unit(format!("DELETE {url}"), url);
            async move { r }.boxed()
        }

        fn mkcol<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
            let r = self.unit(format!("MKCOL {url}"), url);
            async move { r }.boxed()
        }

        fn move_<'a>(&'a self, src: &'a str, dst: &'a str, overwrite: bool) -> FsFuture<'a, ()> {
            let r = self.unit(format!("MOVE {src} {dst} {overwrite}"), src);
            async move { r }.boxed()
        }

        fn copy<'a>(&'a self, src: &'a str, dst: &'a str, overwrite: bool) -> FsFuture<'a, ()> {
            let r = self.unit(format!("COPY {src} {dst} {overwrite}"), src);
            async move { r }.boxed()
        }

        fn patch<'a>(
            &'a self,
            url: &'a str,
            set: &'a [(QName, String)],
            remove: &'a [QName],
        ) -> FsFuture<'a, ()> {
            let set = set
                .iter()
                .map(|(k, v)| format!("{}={}", k.local_name, v))
                .collect::<Vec<_>>()
                .join(",");
            let remove = remove
                .iter()
                .map(|k| format!("-{}", k.local_name))
                .collect::<Vec<_>>()
                .join(",");
            let r = self.unit(format!("PROPPATCH {url} {set}{remove}"), url);
            async move { r }.boxed()
        }

        fn version_control<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool> {
            let ok = !matches!(self.next(format!("VERSION-CONTROL {url}")), Answer::Status(_));
            async move { ok }.boxed()
        }

        fn checkout<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
            let r = self.unit(format!("CHECKOUT {url}"), url);
            async move { r }.boxed()
        }

        fn uncheckout<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
            let r = self.unit(format!("UNCHECKOUT {url}"), url);
            async move { r }.boxed()
        }

        fn checkin<'a>(&'a self, url: &'a str) -> FsFuture<'a, ()> {
            let r = self.unit(format!("CHECKIN {url}"), url);
            async move { r }.boxed()
        }
    }

    pub(crate) fn fs(url: &str, options: FileSystemOptions, fake: Arc<FakeProtocol>) -> DavFileSystem {
        DavFileSystem::with_protocol(FileName::parse(url).unwrap(), options, fake)
    }
}
