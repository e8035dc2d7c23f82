//! Resources as described by a `multistatus` response.

use std::collections::HashMap;
use std::time::SystemTime;

use http::StatusCode;

use crate::filename::Href;
use crate::util::{httpdate_to_systemtime, rfc3339_to_systemtime};
use crate::xml::{element_qname, element_text, PropResponse, QName, NS_DAV_URI};

/// Content type reported for collections.
pub const DIRECTORY_CONTENT_TYPE: &str = "httpd/unix-directory";

/// One resource from a PROPFIND, PROPPATCH, SEARCH or REPORT response.
#[derive(Debug, Clone)]
pub struct DavResource {
    pub href: Href,
    pub status: Option<StatusCode>,
    pub content_type: Option<String>,
    /// `-1` when unknown.
    pub content_length: i64,
    pub content_language: Option<String>,
    /// As received, RFC 3339 / ISO 8601.
    pub creation: Option<String>,
    /// As received, RFC 1123.
    pub modified: Option<String>,
    pub etag: Option<String>,
    pub display_name: Option<String>,
    pub custom_props: HashMap<QName, String>,
}

impl DavResource {
    pub(crate) fn from_response(resp: PropResponse) -> DavResource {
        let mut res = DavResource {
            href: resp.href,
            status: resp.status,
            content_type: None,
            content_length: -1,
            content_language: None,
            creation: None,
            modified: None,
            etag: None,
            display_name: None,
            custom_props: HashMap::new(),
        };
        let mut collection = false;

        for elem in &resp.props {
            let text = || Some(element_text(elem)).filter(|t| !t.is_empty());
            if elem.namespace.as_deref() != Some(NS_DAV_URI) {
                res.custom_props
                    .insert(element_qname(elem), element_text(elem));
                continue;
            }
            match elem.name.as_str() {
                "getcontentlength" => {
                    res.content_length = element_text(elem).parse::<i64>().unwrap_or(-1);
                }
                "getlastmodified" => res.modified = text(),
                "creationdate" => res.creation = text(),
                "displayname" => res.display_name = text(),
                "getcontenttype" => res.content_type = text(),
                "getcontentlanguage" => res.content_language = text(),
                "getetag" => res.etag = text(),
                "resourcetype" => {
                    collection = elem.children.iter().filter_map(|n| n.as_element()).any(|e| {
                        e.name == "collection" && e.namespace.as_deref() == Some(NS_DAV_URI)
                    });
                }
                _ => {
                    res.custom_props
                        .insert(element_qname(elem), element_text(elem));
                }
            }
        }
        if collection {
            res.content_type = Some(DIRECTORY_CONTENT_TYPE.to_string());
        }
        res
    }

    pub fn is_directory(&self) -> bool {
        self.content_type.as_deref() == Some(DIRECTORY_CONTENT_TYPE)
    }

    /// Decoded last path segment of the href.
    pub fn name(&self) -> String {
        crate::filename::decode_path(self.href.last_segment())
    }

    pub fn modified_time(&self) -> Option<SystemTime> {
        self.modified.as_deref().and_then(httpdate_to_systemtime)
    }

    pub fn creation_time(&self) -> Option<SystemTime> {
        self.creation.as_deref().and_then(rfc3339_to_systemtime)
    }

    /// A property by name. Standard properties are looked up in their fields.
    pub fn property(&self, name: &QName) -> Option<String> {
        if name.namespace == NS_DAV_URI {
            let v = match name.local_name.as_str() {
                "getcontentlength" if self.content_length >= 0 => {
                    Some(self.content_length.to_string())
                }
                "getcontentlength" => None,
                "getlastmodified" => self.modified.clone(),
                "creationdate" => self.creation.clone(),
                "displayname" => self.display_name.clone(),
                "getcontenttype" => self.content_type.clone(),
                "getcontentlanguage" => self.content_language.clone(),
                "getetag" => self.etag.clone(),
                _ => return self.custom_props.get(name).cloned(),
            };
            return v;
        }
        self.custom_props.get(name).cloned()
    }
}

/// `quota-available-bytes` / `quota-used-bytes` of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DavQuota {
    pub available_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
}

impl DavQuota {
    pub(crate) fn from_resource(res: &DavResource) -> DavQuota {
        let get = |name: &str| {
            res.custom_props
                .get(&QName::dav(name))
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        DavQuota {
            available_bytes: get("quota-available-bytes"),
            used_bytes: get("quota-used-bytes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_multistatus;

    const BODY: &[u8] = br#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:" xmlns:Z="urn:z">
  <D:response>
    <D:href>/dav/f/</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype><D:collection/></D:resourcetype>
        <D:getcontenttype>text/plain</D:getcontenttype>
        <D:quota-used-bytes>100</D:quota-used-bytes>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/dav/f/a%20b.txt</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype/>
        <D:getcontentlength>5</D:getcontentlength>
        <D:getlastmodified>Thu, 01 Jan 1970 00:01:00 GMT</D:getlastmodified>
        <D:creationdate>1970-01-01T00:00:00Z</D:creationdate>
        <D:getetag>"abc"</D:getetag>
        <D:checked-in><D:href>/v/1</D:href></D:checked-in>
        <Z:color>red</Z:color>
        <plain>x</plain>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

    fn resources() -> Vec<DavResource> {
        parse_multistatus(BODY)
            .unwrap()
            .into_iter()
            .map(DavResource::from_response)
            .collect()
    }

    #[test]
    fn collection_overrides_content_type() {
        let r = resources();
        assert!(r[0].is_directory());
        assert_eq!(r[0].content_length, -1);
        let q = DavQuota::from_resource(&r[0]);
        assert_eq!(q.used_bytes, Some(100));
        assert_eq!(q.available_bytes, None);
    }

    #[test]
    fn standard_and_custom_props() {
        let r = resources();
        let f = &r[1];
        assert!(!f.is_directory());
        assert_eq!(f.name(), "a b.txt");
        assert_eq!(f.content_length, 5);
        assert_eq!(f.etag.as_deref(), Some("\"abc\""));
        assert!(f.modified_time().is_some());
        assert!(f.creation_time().is_some());
        assert_eq!(
            f.custom_props.get(&QName::dav("checked-in")).map(String::as_str),
            Some("/v/1")
        );
        assert_eq!(
            f.custom_props.get(&QName::new("urn:z", "color")).map(String::as_str),
            Some("red")
        );
        let plain = f.custom_props.keys().find(|k| k.local_name == "plain").unwrap();
        assert_eq!(plain.namespace, "");
        assert_eq!(plain.prefix, None);
        assert_eq!(f.property(&QName::dav("getcontentlength")).as_deref(), Some("5"));
    }
}
