mod common;

use std::sync::Arc;

use bytes::Bytes;
use dav_client::body::Body;
use dav_client::transport::config::TransportConfig;
use dav_client::transport::DavRequest;
use dav_client::{
    DavClient, DavError, DavFileSystem, DavMethod, FileName, FileSystemOptions, FileType, NameScope,
    Transport,
};
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{MockServer, Reply};

const FOLDER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/dav/f/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/dav/f/a.txt</D:href>
    <D:propstat>
      <D:prop><D:getcontentlength>5</D:getcontentlength><D:resourcetype/></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/dav/f/b/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

fn client(server: &MockServer, userinfo: &str, config: TransportConfig) -> DavClient {
    let root = FileName::parse(&server.url(userinfo, "/")).unwrap();
    DavClient::new(Arc::new(Transport::new(&root, config).unwrap()))
}

// value of `name` in a `Digest k="v", k2=v2` header.
fn digest_param<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .trim_start_matches("Digest ")
        .split(", ")
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"'))
}

fn single(href: &str, props: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>{href}</D:href>
    <D:propstat>
      <D:prop>{props}</D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#
    )
}

const EMPTY_MULTISTATUS: &str = r#"<D:multistatus xmlns:D="DAV:"/>"#;

const CHECKED_IN: &str = "<D:checked-in><D:href>/dav/f/x/v1</D:href></D:checked-in>";

#[tokio::test]
async fn list_folder() {
    let server = MockServer::start(vec![Reply::multistatus(FOLDER)]).await;
    let fs = DavFileSystem::connect(&server.url("", "/dav/f/"), FileSystemOptions::new())
        .await
        .unwrap();

    let children = fs.root_file().list_children().await.unwrap();
    assert_eq!(children, vec!["/dav/f/a.txt", "/dav/f/b/"]);

    let reqs = server.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].method.as_str(), "PROPFIND");
    assert_eq!(reqs[0].path, "/dav/f/");
    assert_eq!(reqs[0].header("depth"), Some("1"));
    assert!(reqs[0].header("content-type").unwrap().starts_with("text/xml"));
    assert!(reqs[0].body_text().contains("propfind"));
}

#[tokio::test]
async fn read_file() {
    let server = MockServer::start(vec![Reply::status(200).body("hello")]).await;
    let fs = DavFileSystem::connect(&server.url("", "/dav/f/"), FileSystemOptions::new())
        .await
        .unwrap();

    let mut stream = fs.resolve("a.txt").unwrap().input_stream().await.unwrap();
    assert_eq!(stream.content_length(), Some(5));
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"hello");
    let mut more = [0u8; 8];
    assert_eq!(stream.read(&mut more).await.unwrap(), 0);

    assert_eq!(server.methods(), vec!["GET /dav/f/a.txt"]);
}

#[tokio::test]
async fn read_missing_file() {
    let server = MockServer::start(vec![Reply::status(404)]).await;
    let fs = DavFileSystem::connect(&server.url("", "/"), FileSystemOptions::new())
        .await
        .unwrap();
    let err = fs.resolve("nope").unwrap().input_stream().await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn write_new_file() {
    let props = "<D:getcontentlength>4</D:getcontentlength><D:getcontenttype>text/plain</D:getcontenttype>";
    let server = MockServer::start(vec![
        Reply::status(201),
        Reply::multistatus(&single("/dav/f/new.txt", props)),
        Reply::multistatus(&single("/dav/f/new.txt", props)),
    ])
    .await;
    let fs = DavFileSystem::connect(&server.url("", "/dav/f/"), FileSystemOptions::new())
        .await
        .unwrap();

    let file = fs.resolve("new.txt").unwrap();
    let mut out = file.output_stream(false).unwrap();
    out.write_all(b"data").await.unwrap();
    out.close().await.unwrap();

    assert_eq!(file.file_type().await.unwrap(), FileType::File);
    assert_eq!(file.content_size().await.unwrap(), 4);

    let reqs = server.requests();
    assert_eq!(reqs[0].method.as_str(), "PUT");
    assert_eq!(reqs[0].path, "/dav/f/new.txt");
    assert_eq!(&reqs[0].body[..], b"data");
    assert_eq!(reqs[1].header("depth"), Some("0"));
}

#[tokio::test]
async fn write_versioned() {
    let server = MockServer::start(vec![
        Reply::multistatus(&single("/dav/f/x", CHECKED_IN)),
        Reply::status(200),
        Reply::status(204),
        Reply::multistatus(EMPTY_MULTISTATUS),
        Reply::status(200),
    ])
    .await;
    let opts = FileSystemOptions::new().versioning(true);
    let fs = DavFileSystem::connect(&server.url("joe:pw@", "/dav/f/x"), opts)
        .await
        .unwrap();

    let mut out = fs.root_file().output_stream(false).unwrap();
    out.write_all(b"v2").await.unwrap();
    out.close().await.unwrap();

    assert_eq!(
        server.methods(),
        vec![
            "PROPFIND /dav/f/x",
            "CHECKOUT /dav/f/x",
            "PUT /dav/f/x",
            "PROPPATCH /dav/f/x",
            "CHECKIN /dav/f/x",
        ]
    );
    let reqs = server.requests();
    assert_eq!(reqs[0].header("depth"), Some("0"));
    let propfind = reqs[0].body_text();
    assert!(propfind.contains("checked-in") && propfind.contains("checked-out") && propfind.contains("auto-version"));
    let patch = reqs[3].body_text();
    assert!(patch.contains("creator-displayname"));
    assert!(patch.contains(">joe<"));
}

#[tokio::test]
async fn write_versioned_put_fails() {
    let server = MockServer::start(vec![
        Reply::multistatus(&single("/dav/f/x", CHECKED_IN)),
        Reply::status(200),
        Reply::status(507),
        Reply::status(200),
    ])
    .await;
    let opts = FileSystemOptions::new().versioning(true);
    let fs = DavFileSystem::connect(&server.url("", "/dav/f/x"), opts)
        .await
        .unwrap();

    let mut out = fs.root_file().output_stream(false).unwrap();
    out.write_all(b"too big").await.unwrap();
    let err = out.close().await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::INSUFFICIENT_STORAGE));
    assert_eq!(
        server.methods(),
        vec![
            "PROPFIND /dav/f/x",
            "CHECKOUT /dav/f/x",
            "PUT /dav/f/x",
            "UNCHECKOUT /dav/f/x",
        ]
    );
}

#[tokio::test]
async fn rename_maps_scheme() {
    let server = MockServer::start(vec![Reply::status(201)]).await;
    let fs = DavFileSystem::connect(&server.url("", "/"), FileSystemOptions::new())
        .await
        .unwrap();

    let a = fs.resolve(&server.url("", "/a")).unwrap();
    let b = fs.resolve(&server.url("", "/b")).unwrap();
    a.rename(&b).await.unwrap();

    let reqs = server.requests();
    assert_eq!(server.methods(), vec!["MOVE /a"]);
    let destination = format!("{}/b", server.http_root());
    assert_eq!(reqs[0].header("destination"), Some(destination.as_str()));
    assert_eq!(reqs[0].header("overwrite"), Some("F"));
}

#[tokio::test]
async fn move_conflict() {
    let server = MockServer::start(vec![Reply::status(412)]).await;
    let fs = DavFileSystem::connect(&server.url("", "/"), FileSystemOptions::new())
        .await
        .unwrap();
    let err = fs
        .resolve("a")
        .unwrap()
        .rename(&fs.resolve("b").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, DavError::Conflict { .. }));
}

#[test]
fn query_preserving_name() {
    let name = FileName::parse("webdav://h/r?x=1").unwrap();
    let child = name.child("c", NameScope::Child).unwrap();
    assert_eq!(child.path(), "/r/c");
    assert_eq!(child.query(), None);
    assert_eq!(name.uri(), "webdav://h/r?x=1");
    assert_eq!(FileName::parse(&name.uri()).unwrap(), name);
}

#[tokio::test]
async fn basic_challenge_is_answered_and_cached() {
    let server = MockServer::start(vec![
        Reply::status(401).header("www-authenticate", r#"Basic realm="dav""#),
        Reply::status(204),
        Reply::status(204),
    ])
    .await;
    let root = FileName::parse(&server.url("joe:pw@", "/")).unwrap();
    let transport = Transport::new(&root, TransportConfig::new()).unwrap();
    let client = DavClient::new(Arc::new(transport));

    client.delete("/x").await.unwrap();
    client.delete("/y").await.unwrap();

    let reqs = server.requests();
    assert_eq!(reqs.len(), 3);
    assert_eq!(reqs[0].header("authorization"), None);
    assert_eq!(reqs[1].header("authorization"), Some("Basic am9lOnB3"));
    assert_eq!(reqs[2].path, "/y");
    assert_eq!(reqs[2].header("authorization"), Some("Basic am9lOnB3"));
}

#[tokio::test]
async fn exists_uses_propfind() {
    let server = MockServer::start(vec![
        Reply::multistatus(&single("/a", "")),
        Reply::status(404),
    ])
    .await;
    let fs = DavFileSystem::connect(&server.url("", "/"), FileSystemOptions::new())
        .await
        .unwrap();
    assert!(fs.resolve("a").unwrap().exists().await.unwrap());
    assert!(!fs.resolve("b").unwrap().exists().await.unwrap());
    let reqs = server.requests();
    assert_eq!(reqs[0].method.as_str(), "PROPFIND");
    assert!(reqs[0].body.is_empty());
}

#[tokio::test]
async fn options_and_mkcol() {
    let server = MockServer::start(vec![Reply::status(201), Reply::status(405)]).await;
    let root = FileName::parse(&server.url("", "/")).unwrap();
    let client = DavClient::new(Arc::new(Transport::new(&root, TransportConfig::new()).unwrap()));

    let opts = client.options("/").await.unwrap();
    assert!(opts.is_dav());
    assert!(!opts.supports_versioning());

    client.mkcol("/new/").await.unwrap();
    let err = client.mkcol("/new/").await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::METHOD_NOT_ALLOWED));
    assert_eq!(server.methods(), vec!["MKCOL /new/", "MKCOL /new/"]);
    client.shutdown();
}

#[tokio::test]
async fn expectation_failed_put_is_sent_again() {
    let server = MockServer::start(vec![Reply::status(417), Reply::status(201)]).await;
    let client = client(&server, "", TransportConfig::new());

    client
        .put("/x", Bytes::from_static(b"data"), Some("text/plain"), true)
        .await
        .unwrap();

    let reqs = server.requests();
    assert_eq!(server.methods(), vec!["PUT /x", "PUT /x"]);
    assert_eq!(reqs[0].header("expect"), Some("100-continue"));
    assert_eq!(reqs[1].header("expect"), None);
    assert_eq!(reqs[1].header("content-type"), Some("text/plain"));
    assert_eq!(&reqs[1].body[..], b"data");
}

#[tokio::test]
async fn expectation_failed_stream_is_not_sent_again() {
    let server = MockServer::start(vec![Reply::status(417), Reply::status(201)]).await;
    let client = client(&server, "", TransportConfig::new());

    let chunks = vec![Ok::<_, std::io::Error>(Bytes::from_static(b"data"))];
    let body = Body::stream(futures_util::stream::iter(chunks));
    let err = client.put("/s", body, None, true).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::EXPECTATION_FAILED));
    assert_eq!(server.methods(), vec!["PUT /s"]);
}

#[tokio::test]
async fn circular_redirect_is_refused() {
    let server = MockServer::start(vec![
        Reply::status(302).header("location", "/b"),
        Reply::status(302).header("location", "/a"),
        Reply::status(200),
    ])
    .await;
    let client = client(&server, "", TransportConfig::new());

    let err = client
        .transport()
        .execute(DavRequest::new(DavMethod::GET, "/a"))
        .await
        .unwrap_err();

    assert!(matches!(err, DavError::Transport { .. }), "{err:?}");
    assert_eq!(server.methods(), vec!["GET /a", "GET /b"]);
}

#[tokio::test]
async fn redirects_can_be_left_alone() {
    let server = MockServer::start(vec![Reply::status(302).header("location", "/b")]).await;
    let client = client(&server, "", TransportConfig::new().follow_redirects(false));

    let resp = client
        .transport()
        .execute(DavRequest::new(DavMethod::GET, "/a"))
        .await
        .unwrap();

    assert_eq!(resp.status, StatusCode::FOUND);
    assert_eq!(resp.headers.get("location").unwrap(), "/b");
    assert_eq!(server.methods(), vec!["GET /a"]);
}

#[tokio::test]
async fn digest_challenge_is_answered() {
    let challenge = r#"Digest realm="dav", nonce="n0nce", qop="auth", opaque="op""#;
    let server = MockServer::start(vec![
        Reply::status(401).header("www-authenticate", challenge),
        Reply::status(204),
    ])
    .await;
    let client = client(&server, "joe:pw@", TransportConfig::new());

    client.delete("/x").await.unwrap();

    let reqs = server.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].header("authorization"), None);
    let header = reqs[1].header("authorization").unwrap();
    assert!(header.starts_with("Digest "), "{header}");
    assert_eq!(digest_param(header, "username"), Some("joe"));
    assert_eq!(digest_param(header, "realm"), Some("dav"));
    assert_eq!(digest_param(header, "nonce"), Some("n0nce"));
    assert_eq!(digest_param(header, "uri"), Some("/x"));
    assert_eq!(digest_param(header, "qop"), Some("auth"));
    assert_eq!(digest_param(header, "opaque"), Some("op"));

    let nc = digest_param(header, "nc").unwrap();
    let cnonce = digest_param(header, "cnonce").unwrap();
    let ha1 = format!("{:x}", md5::compute("joe:dav:pw"));
    let ha2 = format!("{:x}", md5::compute("DELETE:/x"));
    let expected = format!(
        "{:x}",
        md5::compute(format!("{ha1}:n0nce:{nc}:{cnonce}:auth:{ha2}"))
    );
    assert_eq!(digest_param(header, "response"), Some(expected.as_str()));
}
