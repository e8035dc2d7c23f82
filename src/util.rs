use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;
use headers::Header;
use http::HeaderValue;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::macros::offset;

use crate::errors::DavError;
use crate::DavResult;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const PATCH = 0x0008;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;
        const REPORT = 0x2000;
        const SEARCH = 0x4000;
        const ACL = 0x8000;
        const VERSION_CONTROL = 0x0001_0000;
        const CHECKOUT = 0x0002_0000;
        const UNCHECKOUT = 0x0004_0000;
        const CHECKIN = 0x0008_0000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
        const WEBDAV_BODY = Self::PUT.bits() | Self::PATCH.bits()
            | Self::PROPFIND.bits() | Self::PROPPATCH.bits() | Self::LOCK.bits()
            | Self::REPORT.bits() | Self::SEARCH.bits() | Self::ACL.bits();
        const VERSIONING = Self::VERSION_CONTROL.bits() | Self::CHECKOUT.bits()
            | Self::UNCHECKOUT.bits() | Self::CHECKIN.bits();
    }
}

const METHOD_NAMES: &[(DavMethod, &str)] = &[
    (DavMethod::HEAD, "HEAD"),
    (DavMethod::GET, "GET"),
    (DavMethod::PUT, "PUT"),
    (DavMethod::PATCH, "PATCH"),
    (DavMethod::OPTIONS, "OPTIONS"),
    (DavMethod::PROPFIND, "PROPFIND"),
    (DavMethod::PROPPATCH, "PROPPATCH"),
    (DavMethod::MKCOL, "MKCOL"),
    (DavMethod::COPY, "COPY"),
    (DavMethod::MOVE, "MOVE"),
    (DavMethod::DELETE, "DELETE"),
    (DavMethod::LOCK, "LOCK"),
    (DavMethod::UNLOCK, "UNLOCK"),
    (DavMethod::REPORT, "REPORT"),
    (DavMethod::SEARCH, "SEARCH"),
    (DavMethod::ACL, "ACL"),
    (DavMethod::VERSION_CONTROL, "VERSION-CONTROL"),
    (DavMethod::CHECKOUT, "CHECKOUT"),
    (DavMethod::UNCHECKOUT, "UNCHECKOUT"),
    (DavMethod::CHECKIN, "CHECKIN"),
];

impl DavMethod {
    /// The request-line token for a single method.
    pub fn as_str(&self) -> &'static str {
        METHOD_NAMES
            .iter()
            .find(|(m, _)| m == self)
            .map(|(_, name)| *name)
            .unwrap_or("")
    }

    /// Convert to an `http::Method`, including the extension methods.
    pub fn to_http(&self) -> http::Method {
        match *self {
            DavMethod::HEAD => http::Method::HEAD,
            DavMethod::GET => http::Method::GET,
            DavMethod::PUT => http::Method::PUT,
            DavMethod::PATCH => http::Method::PATCH,
            DavMethod::DELETE => http::Method::DELETE,
            DavMethod::OPTIONS => http::Method::OPTIONS,
            // all names in METHOD_NAMES are valid tokens.
            _ => http::Method::from_bytes(self.as_str().as_bytes()).unwrap_or(http::Method::GET),
        }
    }
}

// translate method into our own enum that has webdav methods as well.
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::PATCH => DavMethod::PATCH,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => match METHOD_NAMES.iter().find(|(_, name)| *name == m.as_str()) {
            Some((dm, _)) => *dm,
            None => {
                return Err(DavError::transport(format!("unknown method {m}")));
            }
        },
    };
    Ok(m)
}

/// A set of methods, as advertised by a server in its `Allow` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DavMethodSet(DavMethod);

impl DavMethodSet {
    pub fn all() -> DavMethodSet {
        DavMethodSet(DavMethod::all())
    }

    pub fn none() -> DavMethodSet {
        DavMethodSet(DavMethod::empty())
    }

    pub fn add(&mut self, m: DavMethod) -> &Self {
        self.0 |= m;
        self
    }

    /// Add every method of `other`.
    pub fn extend(&mut self, other: DavMethodSet) {
        self.0 |= other.0;
    }

    pub fn contains(&self, m: DavMethod) -> bool {
        self.0.contains(m)
    }

    /// Parse a comma separated method list. Unknown methods are ignored.
    pub fn from_allow(allow: &str) -> DavMethodSet {
        let mut set = DavMethodSet::none();
        for name in allow.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Ok(method) = http::Method::from_bytes(name.to_ascii_uppercase().as_bytes()) {
                if let Ok(dm) = dav_method(&method) {
                    set.add(dm);
                }
            }
        }
        set
    }
}

pub fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(t) => time::OffsetDateTime::from_unix_timestamp(t.as_secs() as i64)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
            .to_offset(offset!(UTC)),
        Err(_) => time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC)),
    }
}

pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Parse an RFC 1123 date as sent in `getlastmodified`.
pub fn httpdate_to_systemtime(s: &str) -> Option<SystemTime> {
    let value = HeaderValue::from_str(s.trim()).ok()?;
    let mut values = std::iter::once(&value);
    headers::Date::decode(&mut values).ok().map(SystemTime::from)
}

/// Parse an RFC 3339 / ISO 8601 date as sent in `creationdate`.
pub fn rfc3339_to_systemtime(s: &str) -> Option<SystemTime> {
    let s = s.trim();
    time::OffsetDateTime::parse(s, &Rfc3339)
        .or_else(|_| time::OffsetDateTime::parse(s, &Iso8601::DEFAULT))
        .ok()
        .map(SystemTime::from)
}

// A buffer that implements "Write".
#[derive(Clone, Debug, Default)]
pub struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn len(&self) -> usize {
        self.0.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_dates_parse() {
        let t = httpdate_to_systemtime("Thu, 01 Jan 1970 00:01:00 GMT").unwrap();
        assert_eq!(t, UNIX_EPOCH + Duration::from_secs(60));
        let t = rfc3339_to_systemtime("1970-01-01T00:02:00Z").unwrap();
        assert_eq!(t, UNIX_EPOCH + Duration::from_secs(120));
        assert!(httpdate_to_systemtime("yesterday").is_none());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(DavMethod::VERSION_CONTROL.to_http().as_str(), "VERSION-CONTROL");
        assert_eq!(DavMethod::PROPFIND.to_http().as_str(), "PROPFIND");
        assert_eq!(DavMethod::GET.to_http(), http::Method::GET);
        let m = http::Method::from_bytes(b"UNCHECKOUT").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::UNCHECKOUT);
    }

    #[test]
    fn test_allow_header() {
        let set = DavMethodSet::from_allow("OPTIONS, GET,PROPFIND , checkout, FROB");
        assert!(set.contains(DavMethod::PROPFIND));
        assert!(set.contains(DavMethod::CHECKOUT));
        assert!(!set.contains(DavMethod::PUT));
    }

    #[test]
    fn test_membuffer() {
        let mut b = MemBuffer::new();
        b.write_all(b"hello").unwrap();
        assert_eq!(b.len(), 5);
        assert_eq!(&b.take()[..], b"hello");
        assert!(b.is_empty());
    }
}
