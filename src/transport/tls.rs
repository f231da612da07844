//! # TLS Transport Layer
//!
//! Client-side TLS for connections to the database server.
//!
//! ## Responsibilities
//! - Build a rustls client configuration from [`TlsConfig`]
//! - Trust the system roots plus an optional PEM CA bundle
//! - Present a client certificate for mutual TLS
//! - Certificate pinning and an explicit insecure mode for development
//! - Wrap an established TCP stream once the socket is up

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};

use crate::config::TlsConfig;
use crate::error::{DriverError, Result, TransportErrorKind};

/// TLS Client Configuration
#[derive(Clone)]
pub struct TlsClientConfig {
    server_name: String,
    insecure: bool,
    /// Extra PEM CA bundle trusted alongside the system roots
    ca_file: Option<PathBuf>,
    /// Optional certificate hash to pin (SHA-256 fingerprint)
    pinned_cert_hash: Option<Vec<u8>>,
    /// Optional client certificate path for mTLS
    client_cert_path: Option<PathBuf>,
    /// Optional client key path for mTLS
    client_key_path: Option<PathBuf>,
    /// rustls configuration built by [`prepare`](Self::prepare)
    prepared: Option<Arc<ClientConfig>>,
}

impl fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsClientConfig")
            .field("server_name", &self.server_name)
            .field("insecure", &self.insecure)
            .field("ca_file", &self.ca_file)
            .field("pinned", &self.pinned_cert_hash.is_some())
            .field("client_cert_path", &self.client_cert_path)
            .field("prepared", &self.prepared.is_some())
            .finish()
    }
}

impl TlsClientConfig {
    /// Create a new TLS client configuration
    pub fn new<S: Into<String>>(server_name: S) -> Self {
        Self {
            server_name: server_name.into(),
            insecure: false,
            ca_file: None,
            pinned_cert_hash: None,
            client_cert_path: None,
            client_key_path: None,
            prepared: None,
        }
    }

    /// Build from driver settings; `default_host` is used when no SNI name is set.
    ///
    /// Certificate files are read here, so a bad CA bundle or key fails before
    /// any connection is attempted.
    pub fn from_config(config: &TlsConfig, default_host: &str) -> Result<Self> {
        let mut tls = Self::new(
            config
                .server_name
                .clone()
                .unwrap_or_else(|| default_host.to_string()),
        );
        if let Some(ca) = &config.ca_file {
            tls = tls.with_ca_file(ca);
        }
        match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => tls = tls.with_client_certificate(cert, key),
            (None, None) => {}
            _ => {
                return Err(DriverError::TlsError(
                    "client_cert and client_key must be specified together".into(),
                ))
            }
        }
        if let Some(pin) = &config.pinned_cert_sha256 {
            let hash = hex::decode(pin)
                .map_err(|e| DriverError::TlsError(format!("Invalid pinned_cert_sha256: {e}")))?;
            tls = tls.with_pinned_cert_hash(hash);
        }
        if config.insecure {
            tls = tls.insecure();
        }
        tls.prepare()
    }

    /// Load certificates and keys once and keep the resulting rustls config
    /// for every later handshake
    pub fn prepare(mut self) -> Result<Self> {
        self.server_name()?;
        self.prepared = Some(Arc::new(self.load_client_config()?));
        Ok(self)
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    fn connector(&self) -> Result<TlsConnector> {
        let config = match &self.prepared {
            Some(config) => config.clone(),
            None => Arc::new(self.load_client_config()?),
        };
        Ok(TlsConnector::from(config))
    }

    /// Trust certificates from a PEM bundle
    pub fn with_ca_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.ca_file = Some(path.as_ref().to_path_buf());
        self.prepared = None;
        self
    }

    /// Configure client authentication for mTLS
    pub fn with_client_certificate<P: AsRef<Path>>(mut self, cert_path: P, key_path: P) -> Self {
        self.client_cert_path = Some(cert_path.as_ref().to_path_buf());
        self.client_key_path = Some(key_path.as_ref().to_path_buf());
        self.prepared = None;
        self
    }

    /// Skip certificate verification.
    ///
    /// Only for development against self-signed servers. Combine with
    /// [`with_pinned_cert_hash`](Self::with_pinned_cert_hash) to still accept
    /// exactly one certificate.
    pub fn insecure(mut self) -> Self {
        warn!("INSECURE MODE ENABLED: certificate verification is disabled");
        self.insecure = true;
        self.prepared = None;
        self
    }

    /// Pin a certificate by its SHA-256 fingerprint
    pub fn with_pinned_cert_hash(mut self, hash: Vec<u8>) -> Self {
        if hash.len() != 32 {
            warn!(
                "Certificate hash has unexpected length: {} (expected 32 bytes for SHA-256)",
                hash.len()
            );
        }
        self.pinned_cert_hash = Some(hash);
        self.prepared = None;
        self
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    /// Calculate SHA-256 hash for a certificate to use with pinning
    pub fn calculate_cert_hash(cert: &Certificate) -> Vec<u8> {
        use sha2::{Digest, Sha256};
        Sha256::digest(&cert.0).to_vec()
    }

    fn open(path: &Path) -> Result<BufReader<File>> {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| DriverError::TlsError(format!("Failed to open {}: {e}", path.display())))
    }

    fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
        let certs = rustls_pemfile::certs(&mut Self::open(path)?).map_err(|_| {
            DriverError::TlsError(format!("Failed to parse certificates in {}", path.display()))
        })?;
        if certs.is_empty() {
            return Err(DriverError::TlsError(format!(
                "No certificates found in {}",
                path.display()
            )));
        }
        Ok(certs.into_iter().map(Certificate).collect())
    }

    /// First PKCS#8, RSA or EC key in the file
    fn load_private_key(path: &Path) -> Result<PrivateKey> {
        let items = rustls_pemfile::read_all(&mut Self::open(path)?).map_err(|_| {
            DriverError::TlsError(format!("Failed to parse private key in {}", path.display()))
        })?;
        for item in items {
            match item {
                rustls_pemfile::Item::PKCS8Key(key)
                | rustls_pemfile::Item::RSAKey(key)
                | rustls_pemfile::Item::ECKey(key) => return Ok(PrivateKey(key)),
                _ => {}
            }
        }
        Err(DriverError::TlsError(
            "No supported private key format found".into(),
        ))
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();
        match rustls_native_certs::load_native_certs() {
            Ok(native) => {
                let der: Vec<Vec<u8>> = native.into_iter().map(|c| c.0).collect();
                let (added, ignored) = root_store.add_parsable_certificates(&der);
                debug!(added, ignored, "Loaded system root certificates");
            }
            Err(e) if self.ca_file.is_some() => {
                warn!(error = %e, "Failed to load system roots, using CA file only");
            }
            Err(e) => {
                return Err(DriverError::TlsError(format!(
                    "Failed to load native certs: {e}"
                )))
            }
        }
        if let Some(path) = &self.ca_file {
            for cert in Self::load_certs(path)? {
                root_store.add(&cert).map_err(|e| {
                    DriverError::TlsError(format!("Failed to add CA certificate: {e}"))
                })?;
            }
        }
        Ok(root_store)
    }

    /// Load the TLS client configuration
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let builder = ClientConfig::builder().with_safe_defaults();

        let builder = if let Some(hash) = &self.pinned_cert_hash {
            builder.with_custom_certificate_verifier(Arc::new(PinnedCertificate {
                fingerprint: hash.clone(),
            }))
        } else if self.insecure {
            builder.with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        } else {
            builder.with_custom_certificate_verifier(Arc::new(rustls::client::WebPkiVerifier::new(
                self.root_store()?,
                None,
            )))
        };

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => {
                let chain = Self::load_certs(cert)?;
                let key = Self::load_private_key(key)?;
                builder.with_client_auth_cert(chain, key).map_err(|e| {
                    DriverError::TlsError(format!("Failed to set client certificate: {e}"))
                })
            }
            _ => Ok(builder.with_no_client_auth()),
        }
    }

    /// Get the server name as a rustls::ServerName
    pub fn server_name(&self) -> Result<ServerName> {
        ServerName::try_from(self.server_name.as_str()).map_err(|_| {
            DriverError::TlsError(format!("Invalid server name '{}'", self.server_name))
        })
    }
}

struct PinnedCertificate {
    fingerprint: Vec<u8>,
}

impl rustls::client::ServerCertVerifier for PinnedCertificate {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        if TlsClientConfig::calculate_cert_hash(end_entity) == self.fingerprint {
            Ok(rustls::client::ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "Pinned certificate hash mismatch".into(),
            ))
        }
    }
}

struct AcceptAnyServerCert;

impl rustls::client::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

/// Run the TLS handshake over an established TCP stream
#[instrument(skip(stream, config), fields(server_name = %config.server_name))]
pub async fn wrap(stream: TcpStream, config: &TlsClientConfig) -> Result<TlsStream<TcpStream>> {
    let setup = config.connector().and_then(|c| Ok((c, config.server_name()?)));
    let (connector, domain) = setup.map_err(|e| {
        DriverError::transport(TransportErrorKind::TlsFailed, format!("TLS setup failed: {e}"))
    })?;
    connector.connect(domain, stream).await.map_err(|e| {
        DriverError::transport(
            TransportErrorKind::TlsFailed,
            format!("TLS handshake failed: {e}"),
        )
    })
}
