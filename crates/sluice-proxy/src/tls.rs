//! rustls client configuration
//!
//! Server certificates are checked against the platform roots, extended with
//! an optional CA bundle. A client certificate and key together enable mutual
//! TLS. Verification can be switched off for test backends.

use crate::client::ClientConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::{certs, private_key};
use sluice_core::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Load certificates from a PEM file
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        Error::Config(format!(
            "failed to open certificate file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut reader = BufReader::new(file);
    let certs = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse certificates: {e}")))?;

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    debug!(path = %path.display(), count = certs.len(), "Loaded certificates");
    Ok(certs)
}

/// Load a private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        Error::Config(format!(
            "failed to open private key file {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .map_err(|e| Error::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| Error::Config(format!("no private key found in {}", path.display())))
}

fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(error = %error, "Failed to load a native root certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "Loaded native root certificates");

    if let Some(path) = ca_file {
        for cert in load_certificates(path)? {
            roots
                .add(cert)
                .map_err(|e| Error::Config(format!("invalid CA certificate in {}: {e}", path.display())))?;
        }
        info!(path = %path.display(), "Added custom CA certificates");
    }

    Ok(roots)
}

/// Build the rustls configuration for backend connections
pub fn build_client_tls(config: &ClientConfig) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("unsupported TLS protocol versions: {e}")))?;

    let tls = config.tls.as_ref();
    let builder = if config.insecure_skip_verify {
        warn!("Backend certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
    } else {
        builder.with_root_certificates(root_store(tls.and_then(|t| t.ca_file.as_deref()))?)
    };

    let identity = match tls.map(|t| (t.cert_file.as_deref(), t.key_file.as_deref())) {
        Some((Some(cert), Some(key))) => Some((load_certificates(cert)?, load_private_key(key)?)),
        Some((None, None)) | None => None,
        Some(_) => {
            return Err(Error::Config(
                "client certificate and key must be given together".to_string(),
            ))
        }
    };

    let mut tls_config = match identity {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| Error::Config(format!("invalid client certificate: {e}")))?,
        None => builder.with_no_client_auth(),
    };
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(tls_config)
}

/// Accepts any server certificate; signatures are still checked
#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
