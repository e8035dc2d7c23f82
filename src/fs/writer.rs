//
// Output of a DavFile. The content is buffered in memory and stored with a
// single PUT when the writer is closed. With versioning on, the PUT is
// wrapped in the RFC 3253 checkout/checkin dance.
//
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::AsyncWrite;

use crate::fs::DavFile;
use crate::util::MemBuffer;
use crate::xml::{QName, AUTO_VERSION_CHECKIN_CHECKOUT, VERSION_PROPS};
use crate::DavResult;

// version state of the target before the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionState {
    Absent,
    CheckedIn,
    CheckedOut,
    // the server checks out and in by itself around a PUT.
    AutoVersion,
}

/// Buffers everything written and stores it on [`close`](DavWriter::close).
///
/// Dropping the writer without closing it discards the content.
#[derive(Debug)]
pub struct DavWriter {
    file: DavFile,
    buffer: MemBuffer,
}

impl DavWriter {
    pub(crate) fn new(file: DavFile) -> DavWriter {
        DavWriter {
            file,
            buffer: MemBuffer::new(),
        }
    }

    pub fn file(&self) -> &DavFile {
        &self.file
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Store the content.
    pub async fn close(mut self) -> DavResult<()> {
        let body = self.buffer.take();
        if self.file.is_versioning() {
            self.versioned_put(body).await
        } else {
            self.put(body).await?;
            self.set_author().await;
            Ok(())
        }
    }

    async fn put(&self, body: Bytes) -> DavResult<()> {
        let url = self.file.url();
        debug!("PUT {} ({} bytes)", url, body.len());
        self.file.protocol().put(&url, body, None).await
    }

    async fn version_state(&self) -> DavResult<VersionState> {
        let r = match self.file.resource_with(false, VERSION_PROPS.as_slice()).await {
            Ok(r) => r,
            Err(e) if e.is_not_found() => return Ok(VersionState::Absent),
            Err(e) => return Err(e),
        };
        let prop = |name: &str| r.custom_props.get(&QName::dav(name));
        let state = if prop("checked-out").is_some() {
            VersionState::CheckedOut
        } else if prop("checked-in").is_none()
            && prop("auto-version").map(|v| v.trim()) == Some(AUTO_VERSION_CHECKIN_CHECKOUT)
        {
            VersionState::AutoVersion
        } else {
            VersionState::CheckedIn
        };
        Ok(state)
    }

    async fn versioned_put(&self, body: Bytes) -> DavResult<()> {
        let proto = self.file.protocol();
        let url = self.file.url();
        let state = self.version_state().await?;
        debug!("{}: version state {:?}", url, state);

        let mut did_checkout = false;
        match state {
            VersionState::CheckedIn => match proto.checkout(&url).await {
                Ok(()) => did_checkout = true,
                Err(e) => debug!("CHECKOUT {}: {}", url, e),
            },
            VersionState::AutoVersion => {
                proto.version_control(&url).await;
            }
            VersionState::Absent | VersionState::CheckedOut => {}
        }

        if let Err(e) = self.put(body).await {
            if did_checkout {
                if let Err(e) = proto.uncheckout(&url).await {
                    debug!("UNCHECKOUT {}: {}", url, e);
                }
            }
            return Err(e);
        }
        self.set_author().await;

        match state {
            VersionState::Absent => {
                proto.version_control(&url).await;
                match self.version_state().await {
                    Ok(VersionState::CheckedOut) => proto.checkin(&url).await?,
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            VersionState::CheckedOut => proto.checkin(&url).await?,
            VersionState::CheckedIn if did_checkout => proto.checkin(&url).await?,
            VersionState::CheckedIn | VersionState::AutoVersion => {}
        }
        Ok(())
    }

    // record who wrote the file. Failures are only logged.
    async fn set_author(&self) {
        let url_user = self.file.name().user().map(str::to_string);
        let creator = self.file.creator_name();
        let Some(name) = creator.clone().or_else(|| url_user.clone()) else {
            return;
        };
        let mut set = vec![(QName::dav("creator-displayname"), name)];
        if let (Some(creator), Some(user)) = (&creator, &url_user) {
            if creator != user {
                set.push((QName::dav("comment"), format!("Modified by user {user}")));
            }
        }
        let url = self.file.url();
        if let Err(e) = self.file.protocol().patch(&url, &set, &[]).await {
            debug!("PROPPATCH {}: {}", url, e);
        }
    }
}

impl Write for DavWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for DavWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(self.get_mut().buffer.write(buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
