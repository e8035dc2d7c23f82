//! TLS material: trust strategies, extra trust stores and hostname checks.
//!
//! When none of these are configured reqwest's default rustls setup is
//! used. Otherwise [`client_config`] builds a `rustls::ClientConfig` with
//! a [`ConfiguredVerifier`] that applies them.

use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme, SupportedProtocolVersion,
};

use crate::errors::DavError;
use crate::transport::config::TransportConfig;
use crate::DavResult;

type ChainPredicate = dyn Fn(&[CertificateDer<'_>]) -> bool + Send + Sync;
type HostPredicate = dyn Fn(&str, &CertificateDer<'_>) -> bool + Send + Sync;

/// Decides whether a server certificate chain is trusted, leaf first.
/// A chain accepted by a strategy skips the normal path validation.
#[derive(Clone)]
pub struct TrustStrategy(Arc<ChainPredicate>);

impl TrustStrategy {
    pub fn new(f: impl Fn(&[CertificateDer<'_>]) -> bool + Send + Sync + 'static) -> TrustStrategy {
        TrustStrategy(Arc::new(f))
    }

    /// Trust a chain consisting of just one certificate.
    pub fn self_signed() -> TrustStrategy {
        TrustStrategy::new(|chain| chain.len() == 1)
    }

    pub fn trust_all() -> TrustStrategy {
        TrustStrategy::new(|_| true)
    }

    pub fn is_trusted(&self, chain: &[CertificateDer<'_>]) -> bool {
        (self.0)(chain)
    }
}

impl fmt::Debug for TrustStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TrustStrategy")
    }
}

/// Extra trust anchors.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    certs: Vec<CertificateDer<'static>>,
}

impl KeyStore {
    pub fn from_der(certs: Vec<CertificateDer<'static>>) -> KeyStore {
        KeyStore { certs }
    }

    /// Load every certificate from PEM data.
    pub fn from_pem(pem: &[u8]) -> DavResult<KeyStore> {
        let mut reader = BufReader::new(pem);
        let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(DavError::transport("no certificates in key store"));
        }
        Ok(KeyStore { certs })
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> DavResult<KeyStore> {
        let data = std::fs::read(path)?;
        KeyStore::from_pem(&data)
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

/// How the server name is checked against the certificate.
#[derive(Clone, Default)]
pub enum HostnameVerifier {
    #[default]
    Strict,
    AllowAll,
    Custom(Arc<HostPredicate>),
}

impl HostnameVerifier {
    pub fn custom(f: impl Fn(&str, &CertificateDer<'_>) -> bool + Send + Sync + 'static) -> HostnameVerifier {
        HostnameVerifier::Custom(Arc::new(f))
    }
}

impl fmt::Debug for HostnameVerifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HostnameVerifier::Strict => f.write_str("Strict"),
            HostnameVerifier::AllowAll => f.write_str("AllowAll"),
            HostnameVerifier::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ConfiguredVerifier {
    roots: Arc<RootCertStore>,
    trust: Vec<TrustStrategy>,
    hostname: HostnameVerifier,
    provider: Arc<CryptoProvider>,
}

fn server_name_str(name: &ServerName<'_>) -> String {
    match name {
        ServerName::DnsName(dns) => dns.as_ref().to_string(),
        ServerName::IpAddress(ip) => std::net::IpAddr::from(*ip).to_string(),
        _ => String::new(),
    }
}

impl ServerCertVerifier for ConfiguredVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let cert = ParsedCertificate::try_from(end_entity)?;

        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());
        if self.trust.iter().any(|t| t.is_trusted(&chain)) {
            trace!("certificate chain accepted by trust strategy");
        } else {
            verify_server_cert_signed_by_trust_anchor(
                &cert,
                &self.roots,
                intermediates,
                now,
                self.provider.signature_verification_algorithms.all,
            )?;
        }

        match &self.hostname {
            HostnameVerifier::Strict => verify_server_name(&cert, server_name)?,
            HostnameVerifier::AllowAll => {}
            HostnameVerifier::Custom(f) => {
                if !f(&server_name_str(server_name), end_entity) {
                    return Err(TlsError::InvalidCertificate(CertificateError::NotValidForName));
                }
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn protocol_versions(names: &[String]) -> DavResult<Vec<&'static SupportedProtocolVersion>> {
    if names.is_empty() {
        return Ok(rustls::DEFAULT_VERSIONS.to_vec());
    }
    let mut versions = Vec::new();
    for name in names {
        let v = match name.as_str() {
            "TLSv1.2" | "TLSv1_2" => &rustls::version::TLS12,
            "TLSv1.3" | "TLSv1_3" => &rustls::version::TLS13,
            other => {
                return Err(DavError::transport(format!("unsupported TLS protocol {other}")));
            }
        };
        versions.push(v);
    }
    Ok(versions)
}

// rustls names TLS 1.3 suites TLS13_*, IANA uses TLS_*.
fn cipher_matches(rustls_name: &str, wanted: &str) -> bool {
    rustls_name == wanted || rustls_name.replacen("TLS13_", "TLS_", 1) == wanted
}

fn provider(ciphers: &[String]) -> DavResult<CryptoProvider> {
    let mut provider = rustls::crypto::ring::default_provider();
    if !ciphers.is_empty() {
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            ciphers.iter().any(|c| cipher_matches(&name, c))
        });
        if provider.cipher_suites.is_empty() {
            return Err(DavError::transport("none of the configured cipher suites is supported"));
        }
    }
    Ok(provider)
}

fn root_store(config: &TransportConfig) -> DavResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for store in &config.key_stores {
        for cert in &store.certs {
            roots
                .add(cert.clone())
                .map_err(|e| DavError::transport_with("invalid certificate in key store", e))?;
        }
    }
    Ok(roots)
}

/// Build the rustls configuration for a transport with TLS options.
pub(crate) fn client_config(config: &TransportConfig) -> DavResult<ClientConfig> {
    let provider = Arc::new(provider(&config.tls_ciphers)?);
    let versions = protocol_versions(&config.tls_protocols)?;
    let verifier = ConfiguredVerifier {
        roots: Arc::new(root_store(config)?),
        trust: config.trust.clone(),
        hostname: config.hostname_verifier.clone(),
        provider: provider.clone(),
    };
    let tls = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&versions)
        .map_err(|e| DavError::transport_with("invalid TLS configuration", e))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    debug!(
        "TLS configured: {} protocol(s), {} trust strategies, {} key store(s)",
        versions.len(),
        config.trust.len(),
        config.key_stores.len()
    );
    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocols() {
        let v = protocol_versions(&["TLSv1.3".to_string()]).unwrap();
        assert_eq!(v.len(), 1);
        assert!(protocol_versions(&["SSLv3".to_string()]).is_err());
        assert_eq!(protocol_versions(&[]).unwrap().len(), rustls::DEFAULT_VERSIONS.len());
    }

    #[test]
    fn ciphers() {
        assert!(cipher_matches("TLS13_AES_128_GCM_SHA256", "TLS_AES_128_GCM_SHA256"));
        assert!(cipher_matches(
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"
        ));
        let p = provider(&["TLS_AES_256_GCM_SHA384".to_string()]).unwrap();
        assert_eq!(p.cipher_suites.len(), 1);
        assert!(provider(&["TLS_NULL_WITH_NULL_NULL".to_string()]).is_err());
    }

    #[test]
    fn strategies() {
        let cert = CertificateDer::from(vec![1u8, 2, 3]);
        assert!(TrustStrategy::self_signed().is_trusted(&[cert.clone()]));
        assert!(!TrustStrategy::self_signed().is_trusted(&[cert.clone(), cert.clone()]));
        assert!(TrustStrategy::trust_all().is_trusted(&[]));
    }

    #[test]
    fn empty_pem() {
        assert!(KeyStore::from_pem(b"not a pem").is_err());
    }

    #[test]
    fn build_config() {
        let config = TransportConfig::new()
            .trust(TrustStrategy::self_signed())
            .hostname_verifier(HostnameVerifier::AllowAll)
            .tls_protocols(["TLSv1.2", "TLSv1.3"]);
        assert!(client_config(&config).is_ok());
    }
}
