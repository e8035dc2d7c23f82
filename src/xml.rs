//! XML request bodies and `multistatus` parsing.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Cursor;

use http::StatusCode;
use ::xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};
use ::xml::common::XmlVersion;
use xmltree::{Element, XMLNode};

use crate::errors::DavError;
use crate::filename::Href;
use crate::DavResult;

pub const NS_DAV_URI: &str = "DAV:";
pub const NS_DAV_PREFIX: &str = "D";
/// Namespace for custom properties set through plain attribute names.
pub const NS_CUSTOM_URI: &str = "SAR:";
pub const NS_CUSTOM_PREFIX: &str = "S";

/// `auto-version` value meaning the server checks in by itself after a PUT.
pub const AUTO_VERSION_CHECKIN_CHECKOUT: &str = "checkin-checkout";

const RESERVED_PREFIXES: &[&str] = &["D", "xml", "xmlns"];

/// A namespace-qualified XML name. The prefix is a hint, ignored by `Eq`/`Hash`.
#[derive(Debug, Clone)]
pub struct QName {
    pub namespace: String,
    pub local_name: String,
    pub prefix: Option<String>,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> QName {
        QName {
            namespace: namespace.into(),
            local_name: local_name.into(),
            prefix: None,
        }
    }

    pub fn with_prefix(self, prefix: impl Into<String>) -> QName {
        QName {
            prefix: Some(prefix.into()),
            ..self
        }
    }

    /// A name in the `DAV:` namespace.
    pub fn dav(local_name: &str) -> QName {
        QName::new(NS_DAV_URI, local_name).with_prefix(NS_DAV_PREFIX)
    }

    /// A name in the custom property namespace.
    pub fn custom(local_name: &str) -> QName {
        QName::new(NS_CUSTOM_URI, local_name).with_prefix(NS_CUSTOM_PREFIX)
    }

    /// Parse `{namespace}local`. A bare name goes into the custom namespace.
    pub fn from_clark(s: &str) -> QName {
        if let Some(rest) = s.strip_prefix('{') {
            if let Some((ns, local)) = rest.split_once('}') {
                return QName::new(ns, local);
            }
        }
        QName::custom(s)
    }

    pub fn is_dav(&self) -> bool {
        self.namespace == NS_DAV_URI
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &QName) -> bool {
        self.namespace == other.namespace && self.local_name == other.local_name
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.local_name.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local_name)
    }
}

lazy_static! {
    /// Properties always requested by a listing.
    pub static ref DEFAULT_PROPS: Vec<QName> = vec![
        QName::dav("getcontentlength"),
        QName::dav("getlastmodified"),
        QName::dav("creationdate"),
        QName::dav("displayname"),
        QName::dav("getcontenttype"),
        QName::dav("resourcetype"),
        QName::dav("getetag"),
    ];

    /// RFC 3253 properties probed around a versioned write.
    pub static ref VERSION_PROPS: Vec<QName> = vec![
        QName::dav("checked-in"),
        QName::dav("checked-out"),
        QName::dav("auto-version"),
        QName::dav("comment"),
        QName::dav("creator-displayname"),
    ];

    pub static ref QUOTA_PROPS: Vec<QName> = vec![
        QName::dav("quota-available-bytes"),
        QName::dav("quota-used-bytes"),
    ];
}

fn new_emitter() -> EventWriter<Cursor<Vec<u8>>> {
    EventWriter::new_with_config(
        Cursor::new(Vec::new()),
        EmitterConfig {
            normalize_empty_elements: true,
            perform_indent: false,
            indent_string: Cow::Borrowed(""),
            ..Default::default()
        },
    )
}

fn start_document(emitter: &mut EventWriter<Cursor<Vec<u8>>>) -> DavResult<()> {
    emitter.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: Some(true),
    })?;
    Ok(())
}

fn finish(emitter: EventWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
    emitter.into_inner().into_inner()
}

// prefix candidates: A..Z, AA..ZZ, AAA..ZZZ, ...
fn prefix_candidate(mut n: usize) -> String {
    let mut len = 1;
    let mut count = 26;
    while n >= count {
        n -= count;
        len += 1;
        count *= 26;
    }
    let mut s = vec![b'A'; len];
    for i in (0..len).rev() {
        s[i] = b'A' + (n % 26) as u8;
        n /= 26;
    }
    String::from_utf8(s).unwrap_or_default()
}

/// Binds every namespace to exactly one prefix.
#[derive(Debug)]
pub(crate) struct PrefixMap {
    bound: Vec<(String, String)>,
    next: usize,
}

impl PrefixMap {
    pub(crate) fn new() -> PrefixMap {
        PrefixMap {
            bound: vec![(NS_DAV_URI.to_string(), NS_DAV_PREFIX.to_string())],
            next: 0,
        }
    }

    fn prefix_for(&self, ns: &str) -> Option<&str> {
        self.bound
            .iter()
            .find(|(n, _)| n == ns)
            .map(|(_, p)| p.as_str())
    }

    fn in_use(&self, prefix: &str) -> bool {
        RESERVED_PREFIXES.contains(&prefix) || self.bound.iter().any(|(_, p)| p == prefix)
    }

    /// Returns the prefix for the namespace of `name`, and whether it is new.
    pub(crate) fn bind(&mut self, name: &QName) -> (String, bool) {
        if let Some(p) = self.prefix_for(&name.namespace) {
            return (p.to_string(), false);
        }
        let hint = name
            .prefix
            .as_deref()
            .filter(|p| !p.is_empty() && !self.in_use(p) && valid_prefix(p));
        let prefix = match hint {
            Some(p) => p.to_string(),
            None => loop {
                let candidate = prefix_candidate(self.next);
                self.next += 1;
                if !self.in_use(&candidate) {
                    break candidate;
                }
            },
        };
        self.bound.push((name.namespace.clone(), prefix.clone()));
        (prefix, true)
    }
}

fn valid_prefix(p: &str) -> bool {
    let mut chars = p.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !p.to_ascii_lowercase().starts_with("xml")
}

fn dedup(props: &[QName]) -> Vec<&QName> {
    let mut seen = HashSet::new();
    props.iter().filter(|p| seen.insert(*p)).collect()
}

// Write `<D:prop>` (or another container) holding the names, declaring
// their namespaces on the container itself.
fn write_names(
    emitter: &mut EventWriter<Cursor<Vec<u8>>>,
    container: &str,
    names: &[&QName],
    values: Option<&[&str]>,
) -> DavResult<()> {
    let mut prefixes = PrefixMap::new();
    let mut decls = Vec::new();
    let mut qualified = Vec::new();
    for name in names {
        if name.namespace.is_empty() {
            qualified.push(name.local_name.clone());
            continue;
        }
        let (prefix, new) = prefixes.bind(name);
        if new {
            decls.push((prefix.clone(), name.namespace.clone()));
        }
        qualified.push(format!("{}:{}", prefix, name.local_name));
    }
    let mut ev = XmlWEvent::start_element(container);
    for (p, ns) in &decls {
        ev = ev.ns(p.as_str(), ns.as_str());
    }
    emitter.write(ev)?;
    for (i, q) in qualified.iter().enumerate() {
        emitter.write(XmlWEvent::start_element(q.as_str()))?;
        if let Some(values) = values {
            if let Some(v) = values.get(i).filter(|v| !v.is_empty()) {
                emitter.write(XmlWEvent::characters(v))?;
            }
        }
        emitter.write(XmlWEvent::end_element())?;
    }
    emitter.write(XmlWEvent::end_element())?;
    Ok(())
}

/// Build a `PROPFIND` body.
///
/// With `allprop` the body is `<D:allprop/>`, followed by `<D:include>` when
/// `props` is non-empty. Otherwise `<D:prop>` lists `props`.
pub fn build_propfind(allprop: bool, props: &[QName]) -> DavResult<Vec<u8>> {
    let mut emitter = new_emitter();
    start_document(&mut emitter)?;
    emitter.write(XmlWEvent::start_element("D:propfind").ns(NS_DAV_PREFIX, NS_DAV_URI))?;
    let names = dedup(props);
    if allprop {
        emitter.write(XmlWEvent::start_element("D:allprop"))?;
        emitter.write(XmlWEvent::end_element())?;
        if !names.is_empty() {
            write_names(&mut emitter, "D:include", &names, None)?;
        }
    } else {
        write_names(&mut emitter, "D:prop", &names, None)?;
    }
    emitter.write(XmlWEvent::end_element())?;
    Ok(finish(emitter))
}

/// Build a `PROPPATCH` body: one `D:set` with all values, one `D:remove`.
pub fn build_proppatch(set: &[(QName, String)], remove: &[QName]) -> DavResult<Vec<u8>> {
    let mut emitter = new_emitter();
    start_document(&mut emitter)?;
    emitter.write(XmlWEvent::start_element("D:propertyupdate").ns(NS_DAV_PREFIX, NS_DAV_URI))?;
    if !set.is_empty() {
        emitter.write(XmlWEvent::start_element("D:set"))?;
        let names: Vec<&QName> = set.iter().map(|(n, _)| n).collect();
        let values: Vec<&str> = set.iter().map(|(_, v)| v.as_str()).collect();
        write_names(&mut emitter, "D:prop", &names, Some(values.as_slice()))?;
        emitter.write(XmlWEvent::end_element())?;
    }
    if !remove.is_empty() {
        emitter.write(XmlWEvent::start_element("D:remove"))?;
        let names = dedup(remove);
        write_names(&mut emitter, "D:prop", &names, None)?;
        emitter.write(XmlWEvent::end_element())?;
    }
    emitter.write(XmlWEvent::end_element())?;
    Ok(finish(emitter))
}

/// Build an exclusive write `LOCK` body.
pub fn build_lockinfo(owner: Option<&str>) -> DavResult<Vec<u8>> {
    let mut emitter = new_emitter();
    start_document(&mut emitter)?;
    emitter.write(XmlWEvent::start_element("D:lockinfo").ns(NS_DAV_PREFIX, NS_DAV_URI))?;
    for (outer, inner) in &[("D:lockscope", "D:exclusive"), ("D:locktype", "D:write")] {
        emitter.write(XmlWEvent::start_element(*outer))?;
        emitter.write(XmlWEvent::start_element(*inner))?;
        emitter.write(XmlWEvent::end_element())?;
        emitter.write(XmlWEvent::end_element())?;
    }
    if let Some(owner) = owner {
        emitter.write(XmlWEvent::start_element("D:owner"))?;
        emitter.write(XmlWEvent::characters(owner))?;
        emitter.write(XmlWEvent::end_element())?;
    }
    emitter.write(XmlWEvent::end_element())?;
    Ok(finish(emitter))
}

/// Build a `SEARCH` body. `language` names the query grammar element,
/// e.g. `D:basicsearch`; `query` becomes its text.
pub fn build_search(language: &str, query: &str) -> DavResult<Vec<u8>> {
    let mut emitter = new_emitter();
    start_document(&mut emitter)?;
    emitter.write(XmlWEvent::start_element("D:searchrequest").ns(NS_DAV_PREFIX, NS_DAV_URI))?;
    emitter.write(XmlWEvent::start_element(language))?;
    emitter.write(XmlWEvent::characters(query))?;
    emitter.write(XmlWEvent::end_element())?;
    emitter.write(XmlWEvent::end_element())?;
    Ok(finish(emitter))
}

/// Who an access control entry applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DavPrincipal {
    Href(String),
    Property(QName),
    All,
    Authenticated,
    Unauthenticated,
    Itself,
}

/// One access control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavAce {
    pub principal: DavPrincipal,
    pub grant: Vec<String>,
    pub deny: Vec<String>,
    /// Href of the resource this entry is inherited from.
    pub inherited: Option<String>,
    pub protected: bool,
}

impl DavAce {
    pub fn grant(principal: DavPrincipal, privileges: &[&str]) -> DavAce {
        DavAce {
            principal,
            grant: privileges.iter().map(|p| p.to_string()).collect(),
            deny: Vec::new(),
            inherited: None,
            protected: false,
        }
    }
}

fn write_privileges(
    emitter: &mut EventWriter<Cursor<Vec<u8>>>,
    tag: &str,
    privileges: &[String],
) -> DavResult<()> {
    if privileges.is_empty() {
        return Ok(());
    }
    emitter.write(XmlWEvent::start_element(tag))?;
    for p in privileges {
        emitter.write(XmlWEvent::start_element("D:privilege"))?;
        let name = format!("D:{}", p);
        emitter.write(XmlWEvent::start_element(name.as_str()))?;
        emitter.write(XmlWEvent::end_element())?;
        emitter.write(XmlWEvent::end_element())?;
    }
    emitter.write(XmlWEvent::end_element())?;
    Ok(())
}

/// Build an `ACL` body. Protected and inherited entries are left out.
pub fn build_acl(aces: &[DavAce]) -> DavResult<Vec<u8>> {
    let mut emitter = new_emitter();
    start_document(&mut emitter)?;
    emitter.write(XmlWEvent::start_element("D:acl").ns(NS_DAV_PREFIX, NS_DAV_URI))?;
    for ace in aces.iter().filter(|a| a.inherited.is_none() && !a.protected) {
        emitter.write(XmlWEvent::start_element("D:ace"))?;
        emitter.write(XmlWEvent::start_element("D:principal"))?;
        match &ace.principal {
            DavPrincipal::Href(href) => {
                emitter.write(XmlWEvent::start_element("D:href"))?;
                emitter.write(XmlWEvent::characters(href))?;
                emitter.write(XmlWEvent::end_element())?;
            }
            DavPrincipal::Property(name) => {
                write_names(&mut emitter, "D:property", &[name], None)?;
            }
            other => {
                let tag = match other {
                    DavPrincipal::All => "D:all",
                    DavPrincipal::Authenticated => "D:authenticated",
                    DavPrincipal::Unauthenticated => "D:unauthenticated",
                    _ => "D:self",
                };
                emitter.write(XmlWEvent::start_element(tag))?;
                emitter.write(XmlWEvent::end_element())?;
            }
        }
        emitter.write(XmlWEvent::end_element())?;
        write_privileges(&mut emitter, "D:grant", &ace.grant)?;
        write_privileges(&mut emitter, "D:deny", &ace.deny)?;
        emitter.write(XmlWEvent::end_element())?;
    }
    emitter.write(XmlWEvent::end_element())?;
    Ok(finish(emitter))
}

/// One `<D:response>` of a multistatus body.
#[derive(Debug, Clone)]
pub struct PropResponse {
    pub href: Href,
    /// Response level `<D:status>`, if present.
    pub status: Option<StatusCode>,
    /// Property elements from all successful propstats.
    pub props: Vec<Element>,
}

fn is_dav(elem: &Element, name: &str) -> bool {
    elem.name == name && elem.namespace.as_deref() == Some(NS_DAV_URI)
}

fn dav_children<'a>(elem: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    elem.children
        .iter()
        .filter_map(|n| n.as_element())
        .filter(move |e| is_dav(e, name))
}

fn dav_child<'a>(elem: &'a Element, name: &'a str) -> Option<&'a Element> {
    dav_children(elem, name).next()
}

/// Concatenated text of an element and its descendants, trimmed.
pub fn element_text(elem: &Element) -> String {
    fn collect(elem: &Element, out: &mut String) {
        for node in &elem.children {
            match node {
                XMLNode::Text(t) | XMLNode::CData(t) => out.push_str(t),
                XMLNode::Element(e) => collect(e, out),
                _ => {}
            }
        }
    }
    let mut out = String::new();
    collect(elem, &mut out);
    out.trim().to_string()
}

/// Parse the code out of a `HTTP/1.1 200 OK` status line.
pub fn parse_status_line(line: &str) -> Option<StatusCode> {
    line.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
}

/// Parse a `207 Multi-Status` body.
pub fn parse_multistatus(body: &[u8]) -> DavResult<Vec<PropResponse>> {
    let root = Element::parse(Cursor::new(body))
        .map_err(|e| DavError::transport_with("invalid multistatus body", e))?;
    if !is_dav(&root, "multistatus") {
        return Err(DavError::transport(format!(
            "expected multistatus, got <{}>",
            root.name
        )));
    }
    let mut out = Vec::new();
    for response in dav_children(&root, "response") {
        let raw = match dav_child(response, "href") {
            Some(h) => element_text(h),
            None => {
                warn!("multistatus response without href");
                continue;
            }
        };
        let href = match Href::parse(&raw) {
            Ok(href) => href,
            Err(e) => {
                warn!("skipping response with unparseable href {:?}: {}", raw, e);
                continue;
            }
        };
        let status = dav_child(response, "status").and_then(|s| parse_status_line(&element_text(s)));
        let mut props = Vec::new();
        for propstat in dav_children(response, "propstat") {
            let ok = dav_child(propstat, "status")
                .and_then(|s| parse_status_line(&element_text(s)))
                .map(|sc| sc.is_success())
                .unwrap_or(true);
            if !ok {
                continue;
            }
            if let Some(prop) = dav_child(propstat, "prop") {
                props.extend(prop.children.iter().filter_map(|n| n.as_element()).cloned());
            }
        }
        out.push(PropResponse {
            href,
            status,
            props,
        });
    }
    Ok(out)
}

/// Extract the lock token from a `LOCK` response body.
pub fn parse_lock_token(body: &[u8]) -> Option<String> {
    let root = Element::parse(Cursor::new(body)).ok()?;
    let discovery = if is_dav(&root, "prop") {
        dav_child(&root, "lockdiscovery")?
    } else {
        &root
    };
    let token = dav_child(discovery, "activelock").and_then(|a| dav_child(a, "locktoken"))?;
    let href = dav_child(token, "href").map(element_text)?;
    if href.is_empty() {
        None
    } else {
        Some(href)
    }
}

/// Qualified name of a parsed element.
pub fn element_qname(elem: &Element) -> QName {
    QName {
        namespace: elem.namespace.clone().unwrap_or_default(),
        local_name: elem.name.clone(),
        prefix: elem.prefix.clone().filter(|p| !p.is_empty()),
    }
}
