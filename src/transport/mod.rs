//
// The HTTP side of the client: one `Transport` per authority.
//
// A transport owns the reqwest client (proxy, cookies, TLS, redirects,
// timeouts), the connection permits and the authentication state.
// Requests are described by a `DavRequest`; relative targets are resolved
// against the fixed host the transport was built for.
//
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, PROXY_AUTHORIZATION};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use reqwest::redirect::Policy;

use crate::body::{Body, BodyType, ResponseStream};
use crate::davclient::ResponseHandler;
use crate::errors::DavError;
use crate::filename::{transport_scheme, FileName};
use crate::util::DavMethod;
use crate::DavResult;

pub mod auth;
pub mod config;
pub mod pool;
pub mod tls;

use self::auth::{AuthCache, AuthScheme, AuthScope, CredentialsProvider};
use self::config::{Credentials, TransportConfig};
use self::pool::{ConnectionPool, Route};

const MAX_REDIRECTS: usize = 10;

/// A request to send through a [`Transport`].
#[derive(Debug)]
pub struct DavRequest {
    pub method: DavMethod,
    /// Absolute URL, or a path relative to the transport's host.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Body,
}

impl DavRequest {
    pub fn new(method: DavMethod, target: impl Into<String>) -> DavRequest {
        DavRequest {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    pub fn header(self, name: HeaderName, value: HeaderValue) -> Self {
        let mut this = self;
        this.headers.insert(name, value);
        this
    }

    pub fn typed_header<H: headers::Header>(self, header: H) -> Self {
        let mut this = self;
        this.headers.typed_insert(header);
        this
    }

    pub fn body(self, body: impl Into<Body>) -> Self {
        let mut this = self;
        this.body = body.into();
        this
    }

    /// An XML body with `Content-Type: text/xml; charset=utf-8`.
    pub fn xml(self, xml: Vec<u8>) -> Self {
        self.header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/xml; charset=utf-8"),
        )
        .body(xml)
    }
}

/// A response. The body still has to be read, and holds the connection
/// permit until it is.
#[derive(Debug)]
pub struct DavResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// The URL the request was sent to.
    pub url: String,
    pub body: ResponseStream,
}

impl DavResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The error for this response's status.
    pub fn error(&self) -> DavError {
        DavError::from_status(self.status, self.url.clone())
    }

    /// Fail on a non-2xx status.
    pub fn error_for_status(self) -> DavResult<DavResponse> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.error())
        }
    }

    pub async fn bytes(self) -> DavResult<Bytes> {
        Ok(self.body.bytes().await?)
    }
}

#[derive(Default)]
struct AuthState {
    host: CredentialsProvider,
    proxy: CredentialsProvider,
    cache: AuthCache,
}

/// Pooled HTTP client for one authority.
pub struct Transport {
    root: FileName,
    config: TransportConfig,
    client: Mutex<Option<reqwest::Client>>,
    pool: ConnectionPool,
    auth: Mutex<AuthState>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Transport")
            .field("root", &self.root.transport_root())
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn redirect_policy(config: &TransportConfig) -> Policy {
    if !config.follow_redirects {
        return Policy::none();
    }
    let allow_circular = config.allow_circular_redirects;
    // `previous()` only holds this request's chain, so the circular check
    // starts empty on every call.
    Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allow_circular && attempt.previous().iter().any(|u| u == attempt.url()) {
            attempt.error("circular redirect")
        } else {
            attempt.follow()
        }
    })
}

fn build_client(config: &TransportConfig) -> DavResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .pool_max_idle_per_host(config.max_per_route)
        .redirect(redirect_policy(config));
    if !config.connect_timeout.is_zero() {
        builder = builder.connect_timeout(config.connect_timeout);
    }
    if !config.socket_timeout.is_zero() {
        builder = builder.read_timeout(config.socket_timeout);
    }

    if let Some(proxy) = &config.proxy {
        let mut p = reqwest::Proxy::all(proxy.url())?;
        if let (true, Some(creds)) = (proxy.preemptive, &proxy.credentials) {
            p = p.basic_auth(creds.username(), creds.password());
        }
        builder = builder.proxy(p);
    }

    let jar = Arc::new(reqwest::cookie::Jar::default());
    for cookie in &config.cookies {
        let scheme = if cookie.secure { "https" } else { "http" };
        let origin = format!(
            "{}://{}{}",
            scheme,
            cookie.domain.trim_start_matches('.'),
            cookie.path
        );
        match url::Url::parse(&origin) {
            Ok(url) => jar.add_cookie_str(&cookie.to_set_cookie(), &url),
            Err(e) => warn!("ignoring cookie {} for {}: {}", cookie.name, cookie.domain, e),
        }
    }
    builder = builder.cookie_provider(jar);

    if config.has_tls_options() {
        builder = builder.use_preconfigured_tls(tls::client_config(config)?);
    }
    builder
        .build()
        .map_err(|e| DavError::transport_with("cannot build http client", e))
}

impl Transport {
    /// Build the transport for the authority of `root`.
    pub fn new(root: &FileName, config: TransportConfig) -> DavResult<Transport> {
        let client = build_client(&config)?;
        let mut auth = AuthState::default();
        if let Some(creds) = &config.credentials {
            auth.host.set_host_credentials(root.host(), creds);
        } else if let (Some(user), Some(password)) = (root.user(), root.password()) {
            auth.host
                .set_host_credentials(root.host(), &Credentials::new(user, password));
        }
        // preemptive proxy credentials go with the reqwest proxy, the cache
        // only holds target hosts.
        if let Some(proxy) = &config.proxy {
            if let Some(creds) = &proxy.credentials {
                auth.proxy.set_host_credentials(&proxy.host, creds);
            }
        }
        let pool = ConnectionPool::new(config.max_total_connections, config.max_per_route);
        let transport = Transport {
            root: root.with_path_and_type("/", crate::filename::FileType::Folder)?,
            config,
            client: Mutex::new(Some(client)),
            pool,
            auth: Mutex::new(auth),
        };
        if transport.config.preemptive_auth {
            transport.enable_preemptive_auth(root.host());
        }
        debug!("transport created for {}", transport.root.transport_root());
        Ok(transport)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The fixed host relative requests go to.
    pub fn root(&self) -> &FileName {
        &self.root
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn set_credentials(&self, scope: AuthScope, credentials: Credentials) {
        self.auth.lock().host.set_credentials(scope, credentials);
    }

    /// Send Basic credentials to `host` without waiting for a challenge.
    pub fn enable_preemptive_auth(&self, host: &str) {
        let mut auth = self.auth.lock();
        for scheme in ["http", "https"] {
            let port = crate::filename::default_port_for_scheme(scheme).unwrap_or(0);
            auth.cache.put_basic(scheme, host, port);
            if host.eq_ignore_ascii_case(self.root.host()) && self.root.port() != port {
                auth.cache.put_basic(scheme, host, self.root.port());
            }
        }
    }

    pub fn disable_preemptive_auth(&self) {
        self.auth.lock().cache.clear();
    }

    /// Close all pooled connections. Later requests fail.
    pub fn shutdown(&self) {
        self.pool.close();
        if self.client.lock().take().is_some() {
            debug!("transport for {} shut down", self.root.transport_root());
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.client.lock().is_none()
    }

    /// Turn a request target into the URL that goes on the wire.
    pub fn resolve(&self, target: &str) -> DavResult<url::Url> {
        let absolute = match target.split_once("://") {
            Some((scheme, rest))
                if !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) =>
            {
                let scheme = scheme.to_ascii_lowercase();
                format!("{}://{}", transport_scheme(&scheme), rest)
            }
            _ => {
                let mut s = self.root.transport_root();
                if !target.starts_with('/') {
                    s.push('/');
                }
                s.push_str(target);
                s
            }
        };
        url::Url::parse(&absolute).map_err(|e| DavError::InvalidUrl(format!("{target}: {e}")))
    }

    fn client(&self) -> DavResult<reqwest::Client> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| DavError::transport("transport has been shut down"))
    }

    fn preemptive_header(&self, url: &url::Url) -> Option<HeaderValue> {
        let auth = self.auth.lock();
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        if !auth.cache.has_basic(url.scheme(), host, port) {
            return None;
        }
        let creds = auth.host.get(&AuthScope {
            host: Some(host.to_ascii_lowercase()),
            port: Some(port),
            realm: None,
            scheme: Some(AuthScheme::Basic),
        })?;
        auth::basic_header(creds)
    }

    fn challenge_response(
        &self,
        resp: &reqwest::Response,
        method: &str,
        url: &url::Url,
    ) -> Option<(AuthScheme, HeaderName, HeaderValue)> {
        let (challenge_header, answer_header) = match resp.status() {
            StatusCode::UNAUTHORIZED => (http::header::WWW_AUTHENTICATE, AUTHORIZATION),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                (http::header::PROXY_AUTHENTICATE, PROXY_AUTHORIZATION)
            }
            _ => return None,
        };
        let challenges = auth::parse_challenges(resp.headers().get_all(&challenge_header));
        if challenges.is_empty() {
            return None;
        }
        let auth = self.auth.lock();
        let (provider, host, port) = if answer_header == AUTHORIZATION {
            (&auth.host, url.host_str()?.to_string(), url.port_or_known_default()?)
        } else {
            let proxy = self.config.proxy.as_ref()?;
            (&auth.proxy, proxy.host.clone(), proxy.port)
        };
        let mut uri = url.path().to_string();
        if let Some(q) = url.query() {
            uri.push('?');
            uri.push_str(q);
        }
        auth::respond(&challenges, provider, &host, port, method, &uri)
            .map(|(scheme, value)| (scheme, answer_header, value))
    }

    async fn send(
        client: &reqwest::Client,
        method: DavMethod,
        url: &url::Url,
        headers: HeaderMap,
        body: Body,
    ) -> DavResult<reqwest::Response> {
        Ok(client
            .request(method.to_http(), url.clone())
            .headers(headers)
            .body(body.into_reqwest())
            .send()
            .await?)
    }

    /// Send a request. The response is returned whatever its status;
    /// dropping the future aborts the request.
    pub async fn execute(&self, req: DavRequest) -> DavResult<DavResponse> {
        let DavRequest {
            method,
            target,
            mut headers,
            body,
        } = req;
        let client = self.client()?;
        let url = self.resolve(&target)?;
        let permit = self.pool.acquire(&Route::of(&url)).await?;

        let preemptive = !headers.contains_key(AUTHORIZATION);
        if preemptive {
            if let Some(value) = self.preemptive_header(&url) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        debug!("{} {}", method.as_str(), url);
        if let BodyType::Bytes(Some(b)) = &body.inner {
            trace!("request body: {}", String::from_utf8_lossy(b));
        }

        let spare = body.try_clone();
        let mut resp = Transport::send(&client, method, &url, headers.clone(), body).await?;

        // one retry on an auth challenge, if the body can be sent again.
        if let Some(spare) = spare {
            if let Some((scheme, name, value)) =
                self.challenge_response(&resp, method.as_str(), &url)
            {
                debug!("{} {}: answering {} challenge", method.as_str(), url, scheme);
                headers.insert(name.clone(), value);
                resp = Transport::send(&client, method, &url, headers, spare).await?;
                if scheme == AuthScheme::Basic
                    && name == AUTHORIZATION
                    && resp.status() != StatusCode::UNAUTHORIZED
                {
                    if let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) {
                        self.auth.lock().cache.put_basic(url.scheme(), host, port);
                    }
                }
            }
        }

        let status = resp.status();
        debug!("{} {}: {}", method.as_str(), url, status);
        Ok(DavResponse {
            status,
            headers: resp.headers().clone(),
            url: resp.url().to_string(),
            body: ResponseStream::from_response(resp, Some(permit)),
        })
    }

    /// Send a request and feed the response to `handler`.
    pub async fn execute_with<H: ResponseHandler>(
        &self,
        req: DavRequest,
        handler: &H,
    ) -> DavResult<H::Output> {
        let resp = self.execute(req).await?;
        handler.handle(resp).await
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::config::ProxyConfig;
    use super::*;

    fn transport(url: &str) -> Transport {
        Transport::new(&FileName::parse(url).unwrap(), TransportConfig::new()).unwrap()
    }

    #[test]
    fn resolve_targets() {
        let t = transport("webdav://user:pw@h:8080/dav/f");
        assert_eq!(t.resolve("/a%20b").unwrap().as_str(), "http://h:8080/a%20b");
        assert_eq!(t.resolve("x").unwrap().as_str(), "http://h:8080/x");
        assert_eq!(
            t.resolve("webdavs://other/p?q=1").unwrap().as_str(),
            "https://other/p?q=1"
        );
        assert_eq!(t.resolve("http://other/p").unwrap().as_str(), "http://other/p");
    }

    #[test]
    fn userinfo_becomes_credentials() {
        let t = transport("webdav://joe:pw@h/");
        let auth = t.auth.lock();
        let scope = AuthScope {
            host: Some("h".into()),
            port: Some(80),
            realm: None,
            scheme: Some(AuthScheme::Digest),
        };
        assert_eq!(auth.host.get(&scope).unwrap().username(), "joe");
    }

    #[test]
    fn preemptive_toggle() {
        let t = transport("webdav://joe:pw@h/");
        let url = url::Url::parse("http://h/a").unwrap();
        assert!(t.preemptive_header(&url).is_none());
        t.enable_preemptive_auth("h");
        assert!(t.preemptive_header(&url).is_some());
        assert!(t
            .preemptive_header(&url::Url::parse("https://h/a").unwrap())
            .is_some());
        t.disable_preemptive_auth();
        assert!(t.preemptive_header(&url).is_none());
    }

    #[test]
    fn proxy_credentials_stay_with_the_proxy() {
        let proxy = ProxyConfig::new("h", 8080).credentials(Credentials::new("px", "pw"), true);
        let t = Transport::new(
            &FileName::parse("webdav://joe:pw@h:8080/").unwrap(),
            TransportConfig::new().proxy(proxy),
        )
        .unwrap();
        let url = url::Url::parse("http://h:8080/a").unwrap();
        assert!(t.preemptive_header(&url).is_none());
        t.enable_preemptive_auth("h");
        let value = t.preemptive_header(&url).unwrap();
        assert_eq!(value, auth::basic_header(&Credentials::new("joe", "pw")).unwrap());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let t = transport("webdav://h/");
        t.shutdown();
        t.shutdown();
        assert!(t.is_shut_down());
        let err = t.execute(DavRequest::new(DavMethod::GET, "/")).await.unwrap_err();
        assert!(matches!(err, DavError::Transport { .. }));
    }
}
