//! On-demand certificate authority for TLS interception
//!
//! Loads a long-lived root CA at startup and mints per-hostname leaf
//! certificates in response to TLS SNI. Minted leaves are cached for the
//! process lifetime and never persisted; the CA material is read-only
//! after load.

use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const RSA_BITS: usize = 2048;
const CERT_VALIDITY_DAYS: i64 = 365;
/// Offset for not_before to tolerate client clock skew
const NOT_BEFORE_OFFSET_SECS: i64 = 60;
const LEAF_ORGANIZATION: &str = "KGI";

/// Certificate authority with a per-hostname leaf cache
pub struct CertificateManager {
    /// Root CA reconstructed with its key pair, used as the leaf signer
    signing_cert: RcgenCertificate,
    host_cert_cache: Mutex<HashMap<String, Arc<CertifiedKey>>>,
}

impl CertificateManager {
    /// Load the signing CA from PEM certificate and key files
    ///
    /// Fails when either file is unreadable, malformed, or mismatched.
    /// The root CA is never generated here; operators install their own.
    pub fn from_files(ca_cert_path: &str, ca_key_path: &str) -> Result<Self> {
        let cert_pem = fs::read_to_string(ca_cert_path).map_err(|e| {
            Error::Certificate(format!(
                "failed to read CA certificate file {}: {}",
                ca_cert_path, e
            ))
        })?;
        let key_pem = fs::read_to_string(ca_key_path).map_err(|e| {
            Error::Certificate(format!(
                "failed to read CA private key file {}: {}",
                ca_key_path, e
            ))
        })?;

        let key_pair = KeyPair::from_pem(&key_pem).map_err(|e| {
            Error::Certificate(format!("failed to parse CA key from {}: {}", ca_key_path, e))
        })?;

        let params = CertificateParams::from_ca_cert_pem(&cert_pem, key_pair).map_err(|e| {
            Error::Certificate(format!(
                "failed to parse CA certificate from {}: {}",
                ca_cert_path, e
            ))
        })?;

        let signing_cert = RcgenCertificate::from_params(params).map_err(|e| {
            Error::Certificate(format!("failed to reconstruct CA key pair: {}", e))
        })?;

        info!("certificate manager initialized from {} and {}", ca_cert_path, ca_key_path);

        Ok(Self {
            signing_cert,
            host_cert_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Return a cached or freshly minted leaf for the SNI hostname
    ///
    /// The whole lookup-mint-insert sequence runs under the cache lock;
    /// minting is infrequent relative to the handshakes it enables.
    pub fn certified_key_for(&self, server_name: Option<&str>) -> Result<Arc<CertifiedKey>> {
        let hostname = match server_name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(Error::Certificate("client did not provide SNI".to_string())),
        };

        let hostname = strip_port(hostname)?;

        let mut cache = self.host_cert_cache.lock().unwrap();

        if let Some(cert) = cache.get(&hostname) {
            debug!("using cached certificate for {}", hostname);
            return Ok(cert.clone());
        }

        info!("generating new certificate for {}", hostname);

        let cert = Arc::new(self.mint_host_cert(&hostname)?);
        cache.insert(hostname, cert.clone());
        Ok(cert)
    }

    fn mint_host_cert(&self, hostname: &str) -> Result<CertifiedKey> {
        let host_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_BITS).map_err(|e| {
            Error::Certificate(format!("failed to generate private key for {}: {}", hostname, e))
        })?;
        let host_key_der = host_key.to_pkcs8_der().map_err(|e| {
            Error::Certificate(format!("failed to encode private key for {}: {}", hostname, e))
        })?;
        let key_pair = KeyPair::from_der(host_key_der.as_bytes()).map_err(|e| {
            Error::Certificate(format!("failed to load private key for {}: {}", hostname, e))
        })?;

        let mut params = CertificateParams::default();

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::OrganizationName, LEAF_ORGANIZATION);
        distinguished_name.push(DnType::CommonName, hostname);
        params.distinguished_name = distinguished_name;

        let mut serial = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut serial);
        params.serial_number = Some(SerialNumber::from_slice(&serial));

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::seconds(NOT_BEFORE_OFFSET_SECS);
        params.not_after = now + Duration::days(CERT_VALIDITY_DAYS);

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        params.subject_alt_names = vec![SanType::DnsName(hostname.to_string())];
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            params.subject_alt_names.push(SanType::IpAddress(ip));
        }

        params.alg = &rcgen::PKCS_RSA_SHA256;
        params.key_pair = Some(key_pair);

        let cert = RcgenCertificate::from_params(params).map_err(|e| {
            Error::Certificate(format!("failed to build certificate for {}: {}", hostname, e))
        })?;

        let leaf_der = cert.serialize_der_with_signer(&self.signing_cert).map_err(|e| {
            Error::Certificate(format!("failed to sign certificate for {}: {}", hostname, e))
        })?;
        let private_key = rustls::PrivateKey(cert.serialize_private_key_der());
        let signing_key = rustls::sign::any_supported_type(&private_key).map_err(|e| {
            Error::Certificate(format!("unsupported leaf key for {}: {:?}", hostname, e))
        })?;

        Ok(CertifiedKey::new(
            vec![rustls::Certificate(leaf_der)],
            signing_key,
        ))
    }
}

/// Strip a trailing port from an SNI value
fn strip_port(name: &str) -> Result<String> {
    if !name.contains(':') {
        return Ok(name.to_string());
    }
    if name.matches(':').count() > 1 {
        return Err(Error::Certificate(format!("invalid SNI format: {}", name)));
    }
    match name.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(host.to_string())
        }
        _ => Err(Error::Certificate(format!("invalid SNI format: {}", name))),
    }
}

/// rustls certificate resolver backed by the certificate manager
pub struct HostCertResolver {
    manager: Arc<CertificateManager>,
}

impl HostCertResolver {
    pub fn new(manager: Arc<CertificateManager>) -> Self {
        Self { manager }
    }
}

impl ResolvesServerCert for HostCertResolver {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        match self.manager.certified_key_for(client_hello.server_name()) {
            Ok(cert) => Some(cert),
            Err(e) => {
                warn!("TLS certificate resolution failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Write a throwaway self-signed CA to temp files and load a manager
    fn test_manager(tag: &str) -> CertificateManager {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Test Interception CA");
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let ca = RcgenCertificate::from_params(params).unwrap();
        let dir = std::env::temp_dir();
        let cert_path = dir.join(format!("ca_test_{}.crt", tag));
        let key_path = dir.join(format!("ca_test_{}.key", tag));
        fs::write(&cert_path, ca.serialize_pem().unwrap()).unwrap();
        fs::write(&key_path, ca.serialize_private_key_pem()).unwrap();

        let manager = CertificateManager::from_files(
            cert_path.to_str().unwrap(),
            key_path.to_str().unwrap(),
        )
        .unwrap();

        fs::remove_file(&cert_path).ok();
        fs::remove_file(&key_path).ok();

        manager
    }

    fn leaf_der(cert: &CertifiedKey) -> Vec<u8> {
        cert.cert[0].0.clone()
    }

    #[test]
    fn missing_ca_files_fail() {
        let result = CertificateManager::from_files("/nonexistent/ca.crt", "/nonexistent/ca.key");
        assert!(result.is_err());
    }

    #[test]
    fn empty_sni_fails_without_minting() {
        let manager = test_manager("empty_sni");
        assert!(manager.certified_key_for(None).is_err());
        assert!(manager.certified_key_for(Some("")).is_err());
        assert!(manager.host_cert_cache.lock().unwrap().is_empty());
    }

    #[test]
    fn minted_leaf_matches_hostname() {
        let manager = test_manager("leaf");
        let cert = manager.certified_key_for(Some("secure.test")).unwrap();

        let der = leaf_der(&cert);
        let (_, parsed) = x509_parser::parse_x509_certificate(&der).unwrap();

        let cn = parsed
            .subject()
            .iter_common_name()
            .next()
            .unwrap()
            .as_str()
            .unwrap();
        assert_eq!(cn, "secure.test");

        let san = parsed
            .subject_alternative_name()
            .unwrap()
            .expect("leaf must carry a SAN extension");
        let dns_names: Vec<_> = san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                x509_parser::extensions::GeneralName::DNSName(dns) => Some(*dns),
                _ => None,
            })
            .collect();
        assert_eq!(dns_names, vec!["secure.test"]);

        let basic_constraints = parsed.basic_constraints().unwrap();
        assert!(basic_constraints.map_or(true, |bc| !bc.value.ca));
    }

    #[test]
    fn ip_hostname_gains_ip_san() {
        let manager = test_manager("ip_san");
        let cert = manager.certified_key_for(Some("192.168.1.10")).unwrap();

        let der = leaf_der(&cert);
        let (_, parsed) = x509_parser::parse_x509_certificate(&der).unwrap();
        let san = parsed.subject_alternative_name().unwrap().unwrap();

        let has_ip = san.value.general_names.iter().any(|name| match name {
            x509_parser::extensions::GeneralName::IPAddress(ip) => *ip == &[192u8, 168, 1, 10][..],
            _ => false,
        });
        assert!(has_ip);
    }

    #[test]
    fn repeated_lookups_hit_the_cache() {
        let manager = test_manager("cache");
        let first = manager.certified_key_for(Some("cached.test")).unwrap();
        let second = manager.certified_key_for(Some("cached.test")).unwrap();

        // identical DER means identical serial number
        assert_eq!(leaf_der(&first), leaf_der(&second));

        let other = manager.certified_key_for(Some("other.test")).unwrap();
        assert_ne!(leaf_der(&first), leaf_der(&other));
    }

    #[test]
    fn sni_port_is_stripped() {
        let manager = test_manager("port");
        let with_port = manager.certified_key_for(Some("secure.test:443")).unwrap();
        let without = manager.certified_key_for(Some("secure.test")).unwrap();
        assert_eq!(leaf_der(&with_port), leaf_der(&without));
    }

    #[test]
    fn malformed_sni_is_rejected() {
        let manager = test_manager("bad_sni");
        assert!(manager.certified_key_for(Some("secure.test:")).is_err());
        assert!(manager.certified_key_for(Some(":443")).is_err());
        assert!(manager.certified_key_for(Some("2001:db8::1")).is_err());
    }
}
