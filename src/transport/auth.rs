//! Credentials, auth scopes and challenge responses.

use std::collections::{HashMap, HashSet};
use std::fmt;

use base64::Engine;
use http::HeaderValue;
use regex::Regex;

use crate::transport::config::Credentials;

/// Authentication schemes credentials can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
    Spnego,
    Kerberos,
}

impl AuthScheme {
    pub const ALL: [AuthScheme; 5] = [
        AuthScheme::Basic,
        AuthScheme::Digest,
        AuthScheme::Ntlm,
        AuthScheme::Spnego,
        AuthScheme::Kerberos,
    ];

    /// Scheme from the first token of a challenge.
    pub fn from_challenge(token: &str) -> Option<AuthScheme> {
        match token.to_ascii_lowercase().as_str() {
            "basic" => Some(AuthScheme::Basic),
            "digest" => Some(AuthScheme::Digest),
            "ntlm" => Some(AuthScheme::Ntlm),
            "negotiate" => Some(AuthScheme::Spnego),
            "kerberos" => Some(AuthScheme::Kerberos),
            _ => None,
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            AuthScheme::Basic => "Basic",
            AuthScheme::Digest => "Digest",
            AuthScheme::Ntlm => "NTLM",
            AuthScheme::Spnego => "Negotiate",
            AuthScheme::Kerberos => "Kerberos",
        };
        f.write_str(s)
    }
}

/// Where a credential applies. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthScope {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub realm: Option<String>,
    pub scheme: Option<AuthScheme>,
}

impl AuthScope {
    pub const ANY: AuthScope = AuthScope {
        host: None,
        port: None,
        realm: None,
        scheme: None,
    };

    /// `host`, any port, any realm, one scheme.
    pub fn host_scheme(host: &str, scheme: AuthScheme) -> AuthScope {
        AuthScope {
            host: Some(host.to_ascii_lowercase()),
            port: None,
            realm: None,
            scheme: Some(scheme),
        }
    }

    /// How well this scope covers `target`. `None` if it does not.
    pub fn score(&self, target: &AuthScope) -> Option<u32> {
        fn part<T: PartialEq>(mine: &Option<T>, theirs: &Option<T>, weight: u32) -> Option<u32> {
            match (mine, theirs) {
                (None, _) => Some(0),
                (Some(a), Some(b)) if a == b => Some(weight),
                (Some(_), None) => Some(0),
                _ => None,
            }
        }
        let host = match (&self.host, &target.host) {
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => 8,
            (Some(_), Some(_)) => return None,
            _ => 0,
        };
        Some(
            host + part(&self.port, &target.port, 4)?
                + part(&self.realm, &target.realm, 2)?
                + part(&self.scheme, &target.scheme, 1)?,
        )
    }
}

/// Map of auth scope to credentials.
#[derive(Debug, Clone, Default)]
pub struct CredentialsProvider {
    entries: Vec<(AuthScope, Credentials)>,
}

impl CredentialsProvider {
    pub fn new() -> CredentialsProvider {
        CredentialsProvider::default()
    }

    pub fn set_credentials(&mut self, scope: AuthScope, credentials: Credentials) {
        self.entries.retain(|(s, _)| *s != scope);
        self.entries.push((scope, credentials));
    }

    /// Register host credentials for every scheme on any port.
    /// NTLM gets domain credentials, the rest username/password.
    pub fn set_host_credentials(&mut self, host: &str, credentials: &Credentials) {
        for scheme in AuthScheme::ALL {
            let creds = match (scheme, credentials) {
                (AuthScheme::Ntlm, Credentials::UsernamePassword { username, password }) => {
                    Credentials::Nt {
                        username: username.clone(),
                        password: password.clone(),
                        workstation: String::new(),
                        domain: String::new(),
                    }
                }
                (AuthScheme::Ntlm, nt) => nt.clone(),
                (_, c) => Credentials::new(c.username(), c.password()),
            };
            self.set_credentials(AuthScope::host_scheme(host, scheme), creds);
        }
    }

    /// Best match for `scope`.
    pub fn get(&self, scope: &AuthScope) -> Option<&Credentials> {
        self.entries
            .iter()
            .filter_map(|(s, c)| s.score(scope).map(|score| (score, c)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, c)| c)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hosts for which Basic credentials are sent up front.
#[derive(Debug, Clone, Default)]
pub struct AuthCache {
    basic: HashSet<(String, String, u16)>,
}

impl AuthCache {
    pub fn put_basic(&mut self, scheme: &str, host: &str, port: u16) {
        self.basic
            .insert((scheme.to_string(), host.to_ascii_lowercase(), port));
    }

    pub fn remove_host(&mut self, host: &str) {
        self.basic.retain(|(_, h, _)| !h.eq_ignore_ascii_case(host));
    }

    pub fn has_basic(&self, scheme: &str, host: &str, port: u16) -> bool {
        self.basic
            .contains(&(scheme.to_string(), host.to_ascii_lowercase(), port))
    }

    pub fn clear(&mut self) {
        self.basic.clear();
    }
}

/// One `WWW-Authenticate` / `Proxy-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

impl Challenge {
    pub fn realm(&self) -> Option<&str> {
        self.params.get("realm").map(String::as_str)
    }
}

lazy_static! {
    static ref RE_PARAM: Regex =
        Regex::new(r#"([A-Za-z0-9_-]+)\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^,\s]*))"#).unwrap();
}

/// Parse challenge header values, one challenge per value.
pub fn parse_challenges<'a>(values: impl IntoIterator<Item = &'a HeaderValue>) -> Vec<Challenge> {
    let mut out = Vec::new();
    for value in values {
        let s = match value.to_str() {
            Ok(s) => s.trim(),
            Err(_) => continue,
        };
        let (scheme, rest) = match s.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest),
            None => (s, ""),
        };
        if scheme.is_empty() {
            continue;
        }
        let params = RE_PARAM
            .captures_iter(rest)
            .map(|c| {
                let key = c[1].to_ascii_lowercase();
                let val = c
                    .get(2)
                    .or_else(|| c.get(3))
                    .map(|m| m.as_str().replace("\\\"", "\""))
                    .unwrap_or_default();
                (key, val)
            })
            .collect();
        out.push(Challenge {
            scheme: scheme.to_string(),
            params,
        });
    }
    out
}

fn md5_hex(data: &str) -> String {
    format!("{:x}", md5::compute(data.as_bytes()))
}

pub fn basic_header(credentials: &Credentials) -> Option<HeaderValue> {
    let token = base64::engine::general_purpose::STANDARD.encode(format!(
        "{}:{}",
        credentials.username(),
        credentials.password()
    ));
    HeaderValue::from_str(&format!("Basic {token}")).ok()
}

/// RFC 2617 digest response, `qop=auth` when offered.
pub fn digest_header(
    credentials: &Credentials,
    challenge: &Challenge,
    method: &str,
    uri: &str,
    nc: u32,
    cnonce: &str,
) -> Option<HeaderValue> {
    let realm = challenge.realm().unwrap_or_default();
    let nonce = challenge.params.get("nonce")?;
    let algorithm = challenge
        .params
        .get("algorithm")
        .map(String::as_str)
        .unwrap_or("MD5");
    let qop_auth = challenge
        .params
        .get("qop")
        .map(|q| q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")))
        .unwrap_or(false);

    let mut ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username(),
        realm,
        credentials.password()
    ));
    if algorithm.eq_ignore_ascii_case("MD5-sess") {
        ha1 = md5_hex(&format!("{ha1}:{nonce}:{cnonce}"));
    } else if !algorithm.eq_ignore_ascii_case("MD5") {
        debug!("unsupported digest algorithm {algorithm}");
        return None;
    }
    let ha2 = md5_hex(&format!("{method}:{uri}"));
    let nc = format!("{nc:08x}");
    let response = if qop_auth {
        md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"))
    } else {
        md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
    };

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
        credentials.username(),
        realm,
        nonce,
        uri,
        response,
        algorithm
    );
    if qop_auth {
        header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
    }
    if let Some(opaque) = challenge.params.get("opaque") {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    HeaderValue::from_str(&header).ok()
}

/// Answer the best challenge we can. Digest is preferred over Basic;
/// other schemes are not negotiated.
pub fn respond(
    challenges: &[Challenge],
    provider: &CredentialsProvider,
    host: &str,
    port: u16,
    method: &str,
    uri: &str,
) -> Option<(AuthScheme, HeaderValue)> {
    let lookup = |scheme: AuthScheme, realm: Option<&str>| {
        provider.get(&AuthScope {
            host: Some(host.to_ascii_lowercase()),
            port: Some(port),
            realm: realm.map(str::to_string),
            scheme: Some(scheme),
        })
    };
    let find = |scheme: AuthScheme| {
        challenges
            .iter()
            .find(|c| AuthScheme::from_challenge(&c.scheme) == Some(scheme))
    };
    if let Some(c) = find(AuthScheme::Digest) {
        if let Some(creds) = lookup(AuthScheme::Digest, c.realm()) {
            let cnonce = uuid::Uuid::new_v4().simple().to_string();
            if let Some(h) = digest_header(creds, c, method, uri, 1, &cnonce) {
                return Some((AuthScheme::Digest, h));
            }
        }
    }
    if let Some(c) = find(AuthScheme::Basic) {
        if let Some(creds) = lookup(AuthScheme::Basic, c.realm()) {
            return basic_header(creds).map(|h| (AuthScheme::Basic, h));
        }
    }
    for c in challenges {
        debug!("not answering {} challenge", c.scheme);
    }
    None
}
