//! Structured URL of a remote WebDAV resource.
//!
//! A [`FileName`] is an immutable, normalized view of a
//! `scheme://[user[:pass]@]host[:port][/path][?query]` URL. The path is kept
//! percent-encoded (with unreserved escapes folded back to plain characters),
//! the query string is kept as received.
//!
//! Hrefs returned by a server in a multistatus body are parsed into an
//! [`Href`], and compared to a `FileName` with [`FileName::is_same_resource`].

use std::fmt;
use std::hash::{Hash, Hasher};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::errors::DavError;
use crate::DavResult;

// Characters that must be escaped in the user or password part.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

// Everything outside the unreserved set, `%` included.
const SEGMENT: &AsciiSet = USERINFO;

/// What we know about the type of the resource a name points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Folder,
    Imaginary,
    FileOrFolder,
}

/// How far a relative name may reach in [`FileName::child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameScope {
    /// A single path segment.
    Child,
    /// Any path below the parent.
    Descendent,
    /// Anything, including an absolute path.
    Any,
}

/// A parsed WebDAV URL.
#[derive(Clone)]
pub struct FileName {
    scheme: String,
    host: String,
    port: u16,
    default_port: u16,
    user: Option<String>,
    password: Option<String>,
    path: String,
    query: Option<String>,
    file_type: FileType,
}

/// Default port for the schemes we handle.
pub fn default_port_for_scheme(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "webdav" => Some(80),
        "https" | "webdavs" => Some(443),
        _ => None,
    }
}

/// The scheme used on the wire for an external scheme.
pub fn transport_scheme(scheme: &str) -> &str {
    match scheme {
        "webdav" => "http",
        "webdavs" => "https",
        other => other,
    }
}

fn invalid(url: &str, why: &str) -> DavError {
    DavError::InvalidUrl(format!("{url}: {why}"))
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn is_hex(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

/// Check that every `%` starts a valid escape.
fn valid_escapes(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'%' {
            if i + 2 >= b.len() || !is_hex(b[i + 1]) || !is_hex(b[i + 2]) {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

/// Percent-encode a path.
///
/// Unreserved characters, `/` and existing `%XX` escapes are kept, so
/// encoding an already encoded path is the identity. Escapes of unreserved
/// characters are folded back into the plain character.
pub fn encode_path(path: &str) -> String {
    let b = path.as_bytes();
    let mut out = String::with_capacity(path.len() + 8);
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        if c == b'%' && i + 2 < b.len() && is_hex(b[i + 1]) && is_hex(b[i + 2]) {
            let v = hex_value(b[i + 1]) * 16 + hex_value(b[i + 2]);
            if is_unreserved(v) {
                out.push(v as char);
            } else {
                out.push('%');
                out.push(b[i + 1].to_ascii_uppercase() as char);
                out.push(b[i + 2].to_ascii_uppercase() as char);
            }
            i += 3;
            continue;
        }
        if is_unreserved(c) || c == b'/' {
            out.push(c as char);
        } else {
            out.push_str(percent_encoding::percent_encode_byte(c));
        }
        i += 1;
    }
    out
}

/// Encode a query string: only `?` and `+` are escaped.
pub fn encode_query(query: &str) -> String {
    query.replace('?', "%3F").replace('+', "%2B")
}

// inverse of encode_query.
fn decode_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut rest = query;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.len() >= 3 && tail.as_bytes()[1..3].eq_ignore_ascii_case(b"3F") {
            out.push('?');
            rest = &tail[3..];
        } else if tail.len() >= 3 && tail.as_bytes()[1..3].eq_ignore_ascii_case(b"2B") {
            out.push('+');
            rest = &tail[3..];
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Decode `%XX` escapes. Invalid UTF-8 is replaced.
pub fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

// Normalize an absolute path: resolve `.` and `..`, collapse `//`,
// strip the trailing slash. Returns the encoded path and whether it
// ended in a slash.
fn normalize_path(url: &str, path: &str) -> DavResult<(String, bool)> {
    if !valid_escapes(path) {
        return Err(invalid(url, "invalid percent-escape in path"));
    }
    let trailing = path.len() > 1 && path.ends_with('/');
    let mut segs: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segs.pop().is_none() {
                    return Err(invalid(url, "path escapes the root"));
                }
            }
            s => segs.push(s),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for seg in &segs {
        out.push('/');
        out.push_str(&encode_path(seg));
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok((out, trailing))
}

impl FileName {
    /// Parse an absolute URL.
    pub fn parse(input: &str) -> DavResult<FileName> {
        let input = input.trim();
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid(input, "missing scheme"))?;
        let scheme = scheme.to_ascii_lowercase();
        if scheme.is_empty()
            || !scheme
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
        {
            return Err(invalid(input, "invalid scheme"));
        }
        let default_port = default_port_for_scheme(&scheme)
            .ok_or_else(|| invalid(input, "unsupported scheme"))?;

        // fragment is dropped.
        let rest = rest.split('#').next().unwrap_or_default();
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, Some(decode_query(q))),
            None => (rest, None),
        };
        let (authority, path) = match rest.find('/') {
            Some(pos) => rest.split_at(pos),
            None => (rest, "/"),
        };

        let (userinfo, hostport) = match authority.rfind('@') {
            Some(pos) => (Some(&authority[..pos]), &authority[pos + 1..]),
            None => (None, authority),
        };
        let (user, password) = match userinfo {
            Some(ui) => {
                if !valid_escapes(ui) {
                    return Err(invalid(input, "invalid percent-escape in userinfo"));
                }
                match ui.split_once(':') {
                    Some((u, p)) => (Some(decode_path(u)), Some(decode_path(p))),
                    None => (Some(decode_path(ui)), None),
                }
            }
            None => (None, None),
        };

        let (host, port) = if hostport.starts_with('[') {
            let end = hostport
                .find(']')
                .ok_or_else(|| invalid(input, "unterminated IPv6 address"))?;
            let host = &hostport[..=end];
            let port = match &hostport[end + 1..] {
                "" => None,
                p => Some(
                    p.strip_prefix(':')
                        .ok_or_else(|| invalid(input, "garbage after IPv6 address"))?,
                ),
            };
            (host, port)
        } else {
            match hostport.rsplit_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (hostport, None),
            }
        };
        if host.is_empty() {
            return Err(invalid(input, "missing host"));
        }
        if host
            .bytes()
            .any(|b| b.is_ascii_whitespace() || b.is_ascii_control() || b == b'%')
        {
            return Err(invalid(input, "invalid host"));
        }
        let port = match port {
            None | Some("") => default_port,
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| invalid(input, "invalid port"))?,
        };

        let (path, trailing) = normalize_path(input, path)?;
        let file_type = if trailing {
            FileType::Folder
        } else {
            FileType::FileOrFolder
        };

        Ok(FileName {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            default_port,
            user,
            password,
            path,
            query,
            file_type,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// `http` / `https`, also for `webdav` / `webdavs` names.
    pub fn transport_scheme(&self) -> &str {
        transport_scheme(&self.scheme)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Encoded absolute path, leading `/`, no trailing `/` except for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn decoded_path(&self) -> String {
        decode_path(&self.path)
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Decoded last path segment, empty for the root.
    pub fn base_name(&self) -> String {
        decode_path(self.path.rsplit('/').next().unwrap_or_default())
    }

    fn append_authority(&self, out: &mut String, scheme: &str, userinfo: bool, mask: bool) {
        out.push_str(scheme);
        out.push_str("://");
        if userinfo {
            if let Some(user) = &self.user {
                out.extend(utf8_percent_encode(user, USERINFO));
                if let Some(password) = &self.password {
                    out.push(':');
                    if mask {
                        out.push_str("***");
                    } else {
                        out.extend(utf8_percent_encode(password, USERINFO));
                    }
                }
                out.push('@');
            }
        }
        out.push_str(&self.host);
        if self.port != self.default_port {
            out.push(':');
            out.push_str(&self.port.to_string());
        }
    }

    fn append_path_query(&self, out: &mut String) {
        out.push_str(&self.path);
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(&encode_query(query));
        }
    }

    /// `scheme://[user[:pass]@]host[:port]`, port only if not the default.
    pub fn root_uri(&self) -> String {
        let mut out = String::new();
        self.append_authority(&mut out, &self.scheme, true, false);
        out
    }

    /// Root, encoded path and encoded query.
    pub fn uri(&self) -> String {
        let mut out = self.root_uri();
        self.append_path_query(&mut out);
        out
    }

    /// Like `uri()` but with the password masked.
    pub fn friendly_uri(&self) -> String {
        let mut out = String::new();
        self.append_authority(&mut out, &self.scheme, true, true);
        self.append_path_query(&mut out);
        out
    }

    /// Encoded path plus query, as sent on the request line.
    pub fn path_query(&self) -> String {
        let mut out = String::new();
        self.append_path_query(&mut out);
        out
    }

    /// `http(s)://host[:port]` without userinfo.
    pub fn transport_root(&self) -> String {
        let mut out = String::new();
        self.append_authority(&mut out, self.transport_scheme(), false, false);
        out
    }

    /// Full request URL with the transport scheme and without userinfo.
    pub fn transport_uri(&self) -> String {
        let mut out = self.transport_root();
        self.append_path_query(&mut out);
        out
    }

    /// Same authority and query, new path.
    pub fn with_path_and_type(&self, abs_path: &str, file_type: FileType) -> DavResult<FileName> {
        let (path, _) = normalize_path(abs_path, abs_path)?;
        Ok(FileName {
            path,
            file_type,
            ..self.clone()
        })
    }

    /// Same name with a different type hint.
    pub fn with_type(&self, file_type: FileType) -> FileName {
        FileName {
            file_type,
            ..self.clone()
        }
    }

    /// Resolve a relative name. The child has no query.
    ///
    /// `relative` is a plain name, not a URL path: every character outside
    /// the unreserved set is escaped, `%` included. `/` separates segments.
    pub fn child(&self, relative: &str, scope: NameScope) -> DavResult<FileName> {
        let mut child = self.resolve(relative, scope)?;
        child.query = None;
        Ok(child)
    }

    /// Resolve a relative name, keeping this name's query.
    pub fn child_keep_query(&self, relative: &str, scope: NameScope) -> DavResult<FileName> {
        self.resolve(relative, scope)
    }

    fn resolve(&self, relative: &str, scope: NameScope) -> DavResult<FileName> {
        if relative.is_empty() {
            return Err(invalid(relative, "empty name"));
        }
        let encoded = relative
            .split('/')
            .map(|seg| utf8_percent_encode(seg, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        let joined = if relative.starts_with('/') {
            if scope != NameScope::Any {
                return Err(invalid(relative, "absolute name not allowed here"));
            }
            encoded
        } else {
            let base = self.path.trim_end_matches('/');
            format!("{base}/{encoded}")
        };
        let (path, _) = normalize_path(relative, &joined)?;
        match scope {
            NameScope::Child => {
                let trimmed = relative.trim_end_matches('/');
                if trimmed.contains('/') || trimmed.is_empty() || trimmed == "." || trimmed == ".."
                {
                    return Err(invalid(relative, "not a direct child"));
                }
            }
            NameScope::Descendent => {
                let prefix = if self.is_root() {
                    "/".to_string()
                } else {
                    format!("{}/", self.path)
                };
                if !path.starts_with(&prefix) {
                    return Err(invalid(relative, "not a descendent"));
                }
            }
            NameScope::Any => {}
        }
        Ok(FileName {
            path,
            file_type: FileType::FileOrFolder,
            ..self.clone()
        })
    }

    /// Parent name, `None` for the root.
    pub fn parent(&self) -> Option<FileName> {
        if self.is_root() {
            return None;
        }
        let pos = self.path.rfind('/').unwrap_or(0);
        let path = if pos == 0 {
            "/".to_string()
        } else {
            self.path[..pos].to_string()
        };
        Some(FileName {
            path,
            query: None,
            file_type: FileType::Folder,
            ..self.clone()
        })
    }

    /// Does an href from a server response name this resource.
    pub fn is_same_resource(&self, href: &Href) -> bool {
        paths_equivalent(&self.path, self.query.as_deref(), href.path(), href.query())
    }
}

impl PartialEq for FileName {
    fn eq(&self, other: &FileName) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.port == other.port
            && self.path == other.path
            && self.query == other.query
    }
}

impl Eq for FileName {}

impl Hash for FileName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scheme.hash(state);
        self.host.hash(state);
        self.port.hash(state);
        self.path.hash(state);
        self.query.hash(state);
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.friendly_uri())
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FileName")
            .field("uri", &self.friendly_uri())
            .field("type", &self.file_type)
            .finish()
    }
}

/// Two paths name the same resource if their segments decode to the same
/// names, ignoring one trailing `/`, and their queries are both absent or
/// byte-equal. Scheme and host are not compared. An escaped `/` stays part
/// of its segment.
pub fn paths_equivalent(a: &str, a_query: Option<&str>, b: &str, b_query: Option<&str>) -> bool {
    if a_query != b_query {
        return false;
    }
    if a.is_empty() || b.is_empty() {
        return a == b;
    }
    let segments = |p: &str| -> Vec<String> {
        p.strip_suffix('/')
            .unwrap_or(p)
            .split('/')
            .map(decode_path)
            .collect()
    };
    segments(a) == segments(b)
}

/// A `<D:href>` value: absolute URL or absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Href {
    raw: String,
    scheme: Option<String>,
    host: Option<String>,
    path: String,
    query: Option<String>,
}

impl Href {
    pub fn parse(raw: &str) -> DavResult<Href> {
        let raw = raw.trim();
        if raw.contains("://") {
            let url = url::Url::parse(raw).map_err(|e| invalid(raw, &e.to_string()))?;
            return Ok(Href {
                raw: raw.to_string(),
                scheme: Some(url.scheme().to_string()),
                host: url.host_str().map(|h| h.to_ascii_lowercase()),
                path: url.path().to_string(),
                query: url.query().map(str::to_string),
            });
        }
        if raw.is_empty() {
            return Err(invalid(raw, "empty href"));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid(raw, "invalid character in href"));
        }
        let raw_noframe = raw.split('#').next().unwrap_or_default();
        let (path, query) = match raw_noframe.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (raw_noframe, None),
        };
        if !valid_escapes(path) {
            return Err(invalid(raw, "invalid percent-escape in href"));
        }
        Ok(Href {
            raw: raw.to_string(),
            scheme: None,
            host: None,
            path: path.to_string(),
            query,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Encoded path, as received.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn decoded_path(&self) -> String {
        decode_path(&self.path)
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Encoded last path segment, ignoring a trailing slash.
    pub fn last_segment(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    pub fn is_equivalent(&self, other: &Href) -> bool {
        paths_equivalent(&self.path, self.query(), &other.path, other.query())
    }
}

impl fmt::Display for Href {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
