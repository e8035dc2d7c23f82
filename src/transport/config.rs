use std::fmt;
use std::time::{Duration, SystemTime};

use crate::transport::tls::{HostnameVerifier, KeyStore, TrustStrategy};

/// Default `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = "Jakarta-Commons-VFS/2.0";

/// Credentials for a host or proxy.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    UsernamePassword {
        username: String,
        password: String,
    },
    /// Windows domain credentials.
    Nt {
        username: String,
        password: String,
        workstation: String,
        domain: String,
    },
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Credentials {
        Credentials::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Credentials::UsernamePassword { username, .. } => username,
            Credentials::Nt { username, .. } => username,
        }
    }

    pub fn password(&self) -> &str {
        match self {
            Credentials::UsernamePassword { password, .. } => password,
            Credentials::Nt { password, .. } => password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Credentials::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::Nt {
                username, domain, ..
            } => f
                .debug_struct("Nt")
                .field("username", username)
                .field("domain", domain)
                .finish_non_exhaustive(),
        }
    }
}

/// Route all requests through an HTTP proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    /// Send proxy credentials without waiting for a 407.
    pub preemptive: bool,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> ProxyConfig {
        ProxyConfig {
            host: host.into(),
            port,
            credentials: None,
            preemptive: false,
        }
    }

    pub fn credentials(self, credentials: Credentials, preemptive: bool) -> Self {
        let mut this = self;
        this.credentials = Some(credentials);
        this.preemptive = preemptive;
        this
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// A cookie to seed the cookie store with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<SystemTime>,
    pub secure: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Cookie {
        Cookie {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".to_string(),
            expires: None,
            secure: false,
        }
    }

    /// `Set-Cookie` representation.
    pub(crate) fn to_set_cookie(&self) -> String {
        let mut s = format!(
            "{}={}; Domain={}; Path={}",
            self.name, self.value, self.domain, self.path
        );
        if let Some(expires) = self.expires {
            s.push_str("; Expires=");
            s.push_str(&crate::util::systemtime_to_httpdate(expires));
        }
        if self.secure {
            s.push_str("; Secure");
        }
        s
    }
}

/// Configuration of a [`Transport`](super::Transport).
#[derive(Clone)]
pub struct TransportConfig {
    pub(crate) proxy: Option<ProxyConfig>,
    pub(crate) cookies: Vec<Cookie>,
    pub(crate) trust: Vec<TrustStrategy>,
    pub(crate) key_stores: Vec<KeyStore>,
    pub(crate) tls_protocols: Vec<String>,
    pub(crate) tls_ciphers: Vec<String>,
    pub(crate) hostname_verifier: HostnameVerifier,
    pub(crate) max_total_connections: usize,
    pub(crate) max_per_route: usize,
    pub(crate) connect_timeout: Duration,
    pub(crate) socket_timeout: Duration,
    pub(crate) follow_redirects: bool,
    pub(crate) allow_circular_redirects: bool,
    pub(crate) preemptive_auth: bool,
    pub(crate) user_agent: String,
    pub(crate) credentials: Option<Credentials>,
}

impl Default for TransportConfig {
    fn default() -> TransportConfig {
        TransportConfig {
            proxy: None,
            cookies: Vec::new(),
            trust: Vec::new(),
            key_stores: Vec::new(),
            tls_protocols: Vec::new(),
            tls_ciphers: Vec::new(),
            hostname_verifier: HostnameVerifier::Strict,
            max_total_connections: 20,
            max_per_route: 5,
            connect_timeout: Duration::ZERO,
            socket_timeout: Duration::ZERO,
            follow_redirects: true,
            allow_circular_redirects: false,
            preemptive_auth: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            credentials: None,
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("proxy", &self.proxy)
            .field("cookies", &self.cookies.len())
            .field("trust", &self.trust.len())
            .field("key_stores", &self.key_stores.len())
            .field("tls_protocols", &self.tls_protocols)
            .field("tls_ciphers", &self.tls_ciphers)
            .field("hostname_verifier", &self.hostname_verifier)
            .field("max_total_connections", &self.max_total_connections)
            .field("max_per_route", &self.max_per_route)
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .field("follow_redirects", &self.follow_redirects)
            .field("allow_circular_redirects", &self.allow_circular_redirects)
            .field("preemptive_auth", &self.preemptive_auth)
            .field("user_agent", &self.user_agent)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl TransportConfig {
    pub fn new() -> TransportConfig {
        TransportConfig::default()
    }

    pub fn proxy(self, proxy: ProxyConfig) -> Self {
        let mut this = self;
        this.proxy = Some(proxy);
        this
    }

    pub fn cookie(self, cookie: Cookie) -> Self {
        let mut this = self;
        this.cookies.push(cookie);
        this
    }

    /// Add a trust strategy. A chain is trusted if any strategy accepts it.
    pub fn trust(self, strategy: TrustStrategy) -> Self {
        let mut this = self;
        this.trust.push(strategy);
        this
    }

    /// Add a store of extra trusted certificates.
    pub fn key_store(self, store: KeyStore) -> Self {
        let mut this = self;
        this.key_stores.push(store);
        this
    }

    /// Enabled protocol versions, e.g. `TLSv1.2`, `TLSv1.3`.
    pub fn tls_protocols<S: Into<String>>(self, protocols: impl IntoIterator<Item = S>) -> Self {
        let mut this = self;
        this.tls_protocols = protocols.into_iter().map(Into::into).collect();
        this
    }

    /// Enabled cipher suites, by IANA name.
    pub fn tls_ciphers<S: Into<String>>(self, ciphers: impl IntoIterator<Item = S>) -> Self {
        let mut this = self;
        this.tls_ciphers = ciphers.into_iter().map(Into::into).collect();
        this
    }

    pub fn hostname_verifier(self, verifier: HostnameVerifier) -> Self {
        let mut this = self;
        this.hostname_verifier = verifier;
        this
    }

    pub fn max_total_connections(self, max: usize) -> Self {
        let mut this = self;
        this.max_total_connections = max;
        this
    }

    pub fn max_per_route(self, max: usize) -> Self {
        let mut this = self;
        this.max_per_route = max;
        this
    }

    /// Zero means no timeout.
    pub fn connect_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.connect_timeout = timeout;
        this
    }

    /// Zero means no timeout.
    pub fn socket_timeout(self, timeout: Duration) -> Self {
        let mut this = self;
        this.socket_timeout = timeout;
        this
    }

    pub fn follow_redirects(self, follow: bool) -> Self {
        let mut this = self;
        this.follow_redirects = follow;
        this
    }

    pub fn allow_circular_redirects(self, allow: bool) -> Self {
        let mut this = self;
        this.allow_circular_redirects = allow;
        this
    }

    pub fn preemptive_auth(self, preemptive: bool) -> Self {
        let mut this = self;
        this.preemptive_auth = preemptive;
        this
    }

    pub fn user_agent(self, user_agent: impl Into<String>) -> Self {
        let mut this = self;
        this.user_agent = user_agent.into();
        this
    }

    /// Credentials for the host.
    pub fn credentials(self, credentials: Credentials) -> Self {
        let mut this = self;
        this.credentials = Some(credentials);
        this
    }

    /// True if any TLS option differs from the defaults.
    pub fn has_tls_options(&self) -> bool {
        !self.trust.is_empty()
            || !self.key_stores.is_empty()
            || !self.tls_protocols.is_empty()
            || !self.tls_ciphers.is_empty()
            || !matches!(self.hostname_verifier, HostnameVerifier::Strict)
    }
}
