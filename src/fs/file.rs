use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::body::ResponseStream;
use crate::davclient::Depth;
use crate::errors::DavError;
use crate::filename::{decode_path, encode_query, FileName, FileType, NameScope};
use crate::fs::writer::DavWriter;
use crate::fs::{DavProtocol, FsInner};
use crate::resource::DavResource;
use crate::xml::{QName, VERSION_PROPS};
use crate::DavResult;

/// Content type and language of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    pub content_type: Option<String>,
    pub content_language: Option<String>,
}

/// A file or folder on the server. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DavFile {
    name: FileName,
    fs: Arc<FsInner>,
}

impl DavFile {
    pub(crate) fn new(name: FileName, fs: Arc<FsInner>) -> DavFile {
        DavFile { name, fs }
    }

    pub fn name(&self) -> &FileName {
        &self.name
    }

    pub(crate) fn protocol(&self) -> &dyn DavProtocol {
        self.fs.protocol.as_ref()
    }

    /// Path and query as sent on the request line. Folders get a
    /// trailing slash.
    pub fn url(&self) -> String {
        let mut url = self.name.path().to_string();
        if self.name.file_type() == FileType::Folder && !self.name.is_root() {
            url.push('/');
        }
        if let Some(query) = self.name.query() {
            url.push('?');
            url.push_str(&encode_query(query));
        }
        url
    }

    /// Absolute URL with the transport scheme.
    pub fn wire_url(&self) -> String {
        format!("{}{}", self.name.transport_root(), self.url())
    }

    fn not_found(&self) -> DavError {
        DavError::not_found(self.name.friendly_uri())
    }

    pub(crate) async fn resource_with(&self, allprop: bool, props: &[QName]) -> DavResult<DavResource> {
        let url = self.url();
        let mut resources = self.protocol().list(&url, Depth::Zero, allprop, props).await?;
        if resources.len() == 1 {
            return Ok(resources.remove(0));
        }
        resources
            .into_iter()
            .find(|r| self.name.is_same_resource(&r.href))
            .ok_or_else(|| self.not_found())
    }

    /// The resource as listed by a depth 0 `PROPFIND`.
    pub async fn resource(&self) -> DavResult<DavResource> {
        self.resource_with(false, &[]).await
    }

    /// `Imaginary` if the server does not know the resource.
    pub async fn file_type(&self) -> DavResult<FileType> {
        match self.resource().await {
            Ok(r) if r.is_directory() => Ok(FileType::Folder),
            Ok(_) => Ok(FileType::File),
            Err(e) if e.is_not_found() => Ok(FileType::Imaginary),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self) -> DavResult<bool> {
        self.protocol().exists(&self.url()).await
    }

    /// Hrefs of the members of this folder, as the server sent them.
    pub async fn list_children(&self) -> DavResult<Vec<String>> {
        Ok(self
            .member_resources()
            .await?
            .into_iter()
            .map(|r| r.href.as_str().to_string())
            .collect())
    }

    fn not_a_folder(&self) -> DavError {
        DavError::NotAFolder {
            url: self.name.friendly_uri(),
        }
    }

    // no trailing slash unless the name is known to be a folder.
    async fn member_resources(&self) -> DavResult<Vec<DavResource>> {
        let resources = match self.protocol().list(&self.url(), Depth::One, false, &[]).await {
            Ok(resources) => resources,
            Err(e) if e.is_not_found() => {
                return match self.file_type().await? {
                    FileType::File => Err(self.not_a_folder()),
                    _ => Err(e),
                };
            }
            Err(e) => return Err(e),
        };
        let (own, members): (Vec<_>, Vec<_>) = resources
            .into_iter()
            .partition(|r| self.name.is_same_resource(&r.href));
        if let Some(own) = own.first() {
            if !own.is_directory() {
                return Err(self.not_a_folder());
            }
        }
        Ok(members)
    }

    /// The members of this folder.
    pub async fn children(&self) -> DavResult<Vec<DavFile>> {
        let base = self.with_type(FileType::Folder);
        let mut files = Vec::new();
        for r in self.member_resources().await? {
            let segment = r.href.last_segment();
            if segment.is_empty() {
                continue;
            }
            let kind = if r.is_directory() {
                FileType::Folder
            } else {
                FileType::File
            };
            let name = match base.name.child(&decode_path(segment), NameScope::Child) {
                Ok(name) => name.with_type(kind),
                Err(e) => {
                    warn!("skipping member {}: {}", r.href, e);
                    continue;
                }
            };
            files.push(DavFile::new(name, self.fs.clone()));
        }
        Ok(files)
    }

    fn with_type(&self, kind: FileType) -> DavFile {
        DavFile::new(self.name.with_type(kind), self.fs.clone())
    }

    /// Standard and custom properties, by name. With versioning on,
    /// the version properties are included.
    pub async fn attributes(&self) -> DavResult<BTreeMap<String, String>> {
        let extra: &[QName] = if self.fs.options.versioning {
            VERSION_PROPS.as_slice()
        } else {
            &[]
        };
        let r = self.resource_with(true, extra).await?;

        let mut attrs = BTreeMap::new();
        let mut put = |k: &str, v: Option<String>| {
            if let Some(v) = v {
                attrs.insert(k.to_string(), v);
            }
        };
        put("content-language", r.content_language.clone());
        put(
            "content-length",
            Some(r.content_length).filter(|l| *l >= 0).map(|l| l.to_string()),
        );
        put("content-type", r.content_type.clone());
        put("creation-date", r.creation.clone());
        put("display-name", r.display_name.clone());
        put("etag", r.etag.clone());
        put("href", Some(r.href.as_str().to_string()));
        put("modification-date", r.modified.clone());
        put("name", Some(r.name()));
        put("path", Some(r.href.decoded_path()));
        for (k, v) in &r.custom_props {
            attrs.insert(k.local_name.clone(), v.clone());
        }
        Ok(attrs)
    }

    /// `name` is `{ns}local`, or a bare name in the custom namespace.
    pub async fn set_attribute(&self, name: &str, value: &str) -> DavResult<()> {
        let set = [(QName::from_clark(name), value.to_string())];
        self.protocol().patch(&self.url(), &set, &[]).await
    }

    pub async fn remove_attribute(&self, name: &str) -> DavResult<()> {
        let remove = [QName::from_clark(name)];
        self.protocol().patch(&self.url(), &[], &remove).await
    }

    pub async fn input_stream(&self) -> DavResult<ResponseStream> {
        self.protocol().get(&self.url()).await
    }

    /// A writer that stores its content when closed. Appending is not
    /// supported.
    pub fn output_stream(&self, append: bool) -> DavResult<DavWriter> {
        if append {
            return Err(DavError::not_supported(
                self.name.friendly_uri(),
                "append to a remote file",
            ));
        }
        Ok(DavWriter::new(self.clone()))
    }

    pub(crate) fn creator_name(&self) -> Option<String> {
        self.fs.options.creator_name.clone()
    }

    pub(crate) fn is_versioning(&self) -> bool {
        self.fs.options.versioning
    }

    /// Move to `dst`. An existing destination is not replaced.
    pub async fn rename(&self, dst: &DavFile) -> DavResult<()> {
        self.protocol().move_(&self.url(), &dst.wire_url(), false).await
    }

    pub async fn copy_to(&self, dst: &DavFile, overwrite: bool) -> DavResult<()> {
        self.protocol()
            .copy(&self.url(), &dst.wire_url(), overwrite)
            .await
    }

    pub async fn delete(&self) -> DavResult<()> {
        self.protocol().delete(&self.url()).await
    }

    pub async fn create_folder(&self) -> DavResult<()> {
        self.protocol()
            .mkcol(&self.with_type(FileType::Folder).url())
            .await
    }

    pub fn is_same_file(&self, other: &DavFile) -> bool {
        self.name == other.name
    }

    /// Zero when the server does not say.
    pub async fn content_size(&self) -> DavResult<u64> {
        Ok(self.resource().await?.content_length.max(0) as u64)
    }

    pub async fn last_modified(&self) -> DavResult<Option<SystemTime>> {
        Ok(self.resource().await?.modified_time())
    }

    pub async fn content_type(&self) -> DavResult<Option<String>> {
        Ok(self.resource().await?.content_type)
    }

    /// Like `content_type()`, guessing from the name when the server sends
    /// nothing.
    pub async fn content_info(&self) -> DavResult<ContentInfo> {
        let r = self.resource().await?;
        let content_type = r.content_type.or_else(|| {
            mime_guess::from_path(self.name.base_name())
                .first()
                .map(|m| m.essence_str().to_string())
        });
        Ok(ContentInfo {
            content_type,
            content_language: r.content_language,
        })
    }
}
