use std::collections::HashMap;

use crate::davclient::{
    Depth, DavClient, ExistsHandler, PropMap, PropertiesHandler, ResourcesHandler, DEPTH,
};
use crate::errors::DavError;
use crate::filename::{paths_equivalent, Href};
use crate::resource::{DavQuota, DavResource};
use crate::transport::DavRequest;
use crate::util::DavMethod;
use crate::xml::{self, QName, DEFAULT_PROPS, QUOTA_PROPS};
use crate::DavResult;

// the default set, followed by any extras not already in it.
fn with_defaults(extra: &[QName]) -> Vec<QName> {
    let mut props = DEFAULT_PROPS.clone();
    for p in extra {
        if !props.contains(p) {
            props.push(p.clone());
        }
    }
    props
}

/// Pick the entry for `url` out of a multistatus.
fn select<T>(entries: Vec<T>, url: &url::Url, href: impl Fn(&T) -> &Href) -> Option<T> {
    if entries.len() == 1 {
        return entries.into_iter().next();
    }
    let pos = entries
        .iter()
        .position(|e| {
            let h = href(e);
            paths_equivalent(url.path(), url.query(), h.path(), h.query())
        })
        .or_else(|| {
            let wanted = url.path().trim_end_matches('/');
            entries.iter().position(|e| {
                let h = href(e).as_str().trim_end_matches('/');
                !wanted.is_empty() && !h.is_empty() && (h.ends_with(wanted) || wanted.ends_with(h))
            })
        })?;
    entries.into_iter().nth(pos)
}

impl DavClient {
    pub fn propfind_request(
        &self,
        url: &str,
        depth: Depth,
        allprop: bool,
        props: &[QName],
    ) -> DavResult<DavRequest> {
        Ok(DavRequest::new(DavMethod::PROPFIND, url)
            .header(DEPTH, depth.header_value())
            .xml(xml::build_propfind(allprop, props)?))
    }

    /// List a resource, and its members down to `depth`. The default
    /// properties are always asked for; with `allprop` only the extras
    /// are named, in `D:include`.
    pub async fn list(
        &self,
        url: &str,
        depth: Depth,
        allprop: bool,
        props: &[QName],
    ) -> DavResult<Vec<DavResource>> {
        let req = if allprop {
            self.propfind_request(url, depth, true, props)?
        } else {
            self.propfind_request(url, depth, false, &with_defaults(props))?
        };
        self.execute(req, &ResourcesHandler).await
    }

    /// Properties of the single resource named by `url`.
    pub async fn properties(
        &self,
        url: &str,
        props: &[QName],
        allprop: bool,
    ) -> DavResult<HashMap<QName, String>> {
        let req = self.propfind_request(url, Depth::Zero, allprop, props)?;
        let entries: Vec<PropMap> = self.execute(req, &PropertiesHandler).await?;
        let wire = self.transport().resolve(url)?;
        select(entries, &wire, |e| &e.href)
            .map(|e| e.props)
            .ok_or_else(|| DavError::not_found(wire.to_string()))
    }

    /// Body-less `PROPFIND`, since some servers refuse `HEAD`.
    pub async fn exists(&self, url: &str) -> DavResult<bool> {
        let req = DavRequest::new(DavMethod::PROPFIND, url).header(DEPTH, Depth::Zero.header_value());
        self.execute(req, &ExistsHandler).await
    }

    pub fn proppatch_request(
        &self,
        url: &str,
        set: &[(QName, String)],
        remove: &[QName],
    ) -> DavResult<DavRequest> {
        Ok(DavRequest::new(DavMethod::PROPPATCH, url).xml(xml::build_proppatch(set, remove)?))
    }

    pub async fn patch(
        &self,
        url: &str,
        set: &[(QName, String)],
        remove: &[QName],
    ) -> DavResult<Vec<DavResource>> {
        let req = self.proppatch_request(url, set, remove)?;
        self.execute(req, &ResourcesHandler).await
    }

    pub async fn quota(&self, url: &str) -> DavResult<DavQuota> {
        let req = self.propfind_request(url, Depth::Zero, false, &QUOTA_PROPS)?;
        let resources = self.execute(req, &ResourcesHandler).await?;
        let wire = self.transport().resolve(url)?;
        select(resources, &wire, |r| &r.href)
            .map(|r| DavQuota::from_resource(&r))
            .ok_or_else(|| DavError::not_found(wire.to_string()))
    }

    pub fn search_request(&self, url: &str, language: &str, query: &str) -> DavResult<DavRequest> {
        Ok(DavRequest::new(DavMethod::SEARCH, url).xml(xml::build_search(language, query)?))
    }

    pub async fn search(&self, url: &str, language: &str, query: &str) -> DavResult<Vec<DavResource>> {
        let req = self.search_request(url, language, query)?;
        self.execute(req, &ResourcesHandler).await
    }

    /// `REPORT` with a caller-built body.
    pub async fn report(&self, url: &str, depth: Depth, body: Vec<u8>) -> DavResult<Vec<DavResource>> {
        let req = DavRequest::new(DavMethod::REPORT, url)
            .header(DEPTH, depth.header_value())
            .xml(body);
        self.execute(req, &ResourcesHandler).await
    }
}
