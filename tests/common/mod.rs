//! A scripted HTTP server for the integration tests.
//!
//! Every request except `OPTIONS` is recorded and answered with the next
//! queued [`Reply`]. `OPTIONS` always gets a class 1,2 answer, since
//! `DavFileSystem::connect` probes with it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl Reply {
    pub fn status(code: u16) -> Reply {
        Reply {
            status: StatusCode::from_u16(code).unwrap(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn multistatus(body: &str) -> Reply {
        Reply::status(207)
            .header("content-type", "application/xml; charset=utf-8")
            .body(body)
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Reply {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn body(mut self, body: &str) -> Reply {
        self.body = body.to_string();
        self
    }
}

#[derive(Default)]
struct State {
    requests: Mutex<Vec<Recorded>>,
    replies: Mutex<VecDeque<Reply>>,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
}

async fn handle(state: Arc<State>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|b| b.to_bytes())
        .unwrap_or_default();

    if parts.method == Method::OPTIONS {
        let resp = Response::builder()
            .header("dav", "1, 2")
            .header("allow", "OPTIONS, GET, PUT, PROPFIND")
            .body(Full::new(Bytes::new()))
            .unwrap();
        return Ok(resp);
    }

    state.requests.lock().push(Recorded {
        method: parts.method,
        path: parts
            .uri
            .path_and_query()
            .map(|p| p.to_string())
            .unwrap_or_default(),
        headers: parts.headers,
        body,
    });
    let reply = state
        .replies
        .lock()
        .pop_front()
        .unwrap_or_else(|| Reply::status(500).body("no reply queued"));

    let mut resp = Response::builder().status(reply.status);
    for (name, value) in &reply.headers {
        resp = resp.header(*name, value.as_str());
    }
    Ok(resp.body(Full::new(Bytes::from(reply.body))).unwrap())
}

impl MockServer {
    pub async fn start(replies: Vec<Reply>) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
        });

        let st = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let st = st.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle(st.clone(), req));
                    let _ = http1::Builder::new().serve_connection(io, service).await;
                });
            }
        });
        MockServer { addr, state }
    }

    /// `webdav://127.0.0.1:<port><path>`, `userinfo` goes before the host.
    pub fn url(&self, userinfo: &str, path: &str) -> String {
        format!("webdav://{}127.0.0.1:{}{}", userinfo, self.addr.port(), path)
    }

    pub fn http_root(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}
