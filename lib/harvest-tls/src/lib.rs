//! Transport Layer Security (TLS) configuration and helpers.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock},
};

use harvest_error::{generic_error, ErrorContext as _, GenericError};
use rustls::{client::Resumption, pki_types::ServerName, ClientConfig, RootCertStore};
use tracing::debug;

/// Tracks if the default cryptography provider for `rustls` has been set.
static DEFAULT_CRYPTO_PROVIDER_SET: OnceLock<()> = OnceLock::new();

/// Default root certificate store to use for TLS when one isn't explicitly provided.
static DEFAULT_ROOT_CERT_STORE_MUTEX: Mutex<()> = Mutex::new(());
static DEFAULT_ROOT_CERT_STORE: OnceLock<Arc<RootCertStore>> = OnceLock::new();

const DEFAULT_MAX_TLS12_RESUMPTION_SESSIONS: usize = 8;

/// A TLS client configuration builder.
///
/// Exposes various options for configuring a client's TLS configuration that would otherwise be cumbersome to
/// configure, and provides sane defaults for many common options.
///
/// Brokers commonly present certificates issued by a private certificate authority, so a CA bundle can be supplied in
/// place of the platform's root certificates.
#[derive(Clone, Default)]
pub struct ClientTLSConfigBuilder {
    max_tls12_resumption_sessions: Option<usize>,
    root_cert_store: Option<RootCertStore>,
    ca_file: Option<PathBuf>,
}

impl ClientTLSConfigBuilder {
    /// Creates a new `ClientTLSConfigBuilder` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of TLS 1.2 sessions to cache.
    ///
    /// Defaults to 8.
    pub fn with_max_tls12_resumption_sessions(mut self, max: usize) -> Self {
        self.max_tls12_resumption_sessions = Some(max);
        self
    }

    /// Sets the root certificate store to use for the client.
    ///
    /// Defaults to the "default" root certificate store initialized from the platform. (See
    /// [`load_platform_root_certificates`].)
    pub fn with_root_cert_store(mut self, store: RootCertStore) -> Self {
        self.root_cert_store = Some(store);
        self
    }

    /// Sets a PEM file of CA certificates to trust instead of the default root certificate store.
    ///
    /// Takes precedence over [`with_root_cert_store`][Self::with_root_cert_store]. The file is read when the
    /// configuration is built.
    pub fn with_ca_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Builds the client TLS configuration.
    ///
    /// # Errors
    ///
    /// If a CA file was given and could not be loaded, or if no root certificate store was given and the default one
    /// (see [`load_platform_root_certificates`]) has not been initialized, an error will be returned.
    pub fn build(self) -> Result<ClientConfig, GenericError> {
        let max_tls12_resumption_sessions = self
            .max_tls12_resumption_sessions
            .unwrap_or(DEFAULT_MAX_TLS12_RESUMPTION_SESSIONS);

        let root_cert_store = match (self.ca_file, self.root_cert_store) {
            (Some(path), _) => Arc::new(load_ca_file(&path)?),
            (None, Some(store)) => Arc::new(store),
            (None, None) => DEFAULT_ROOT_CERT_STORE
                .get()
                .map(Arc::clone)
                .ok_or_else(|| generic_error!("Default TLS root certificate store not initialized."))?,
        };

        let mut config = ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        config.resumption = Resumption::in_memory_sessions(max_tls12_resumption_sessions);

        #[cfg(feature = "fips")]
        if !config.fips() {
            return Err(generic_error!("Client TLS configuration is not FIPS compliant."));
        }

        Ok(config)
    }
}

/// Loads every certificate from a PEM file into a new root certificate store.
///
/// # Errors
///
/// If the file can't be read, contains malformed PEM, or contains no usable certificate, an error will be returned.
pub fn load_ca_file(path: &Path) -> Result<RootCertStore, GenericError> {
    let file = File::open(path).with_error_context(|| format!("Failed to open CA file '{}'.", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_error_context(|| format!("Failed to parse CA file '{}'.", path.display()))?;

    let mut store = RootCertStore::empty();
    let (added, failed) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(generic_error!(
            "No usable certificates found in CA file '{}' ({} rejected).",
            path.display(),
            failed
        ));
    }

    debug!(added, failed, ca_file = %path.display(), "Loaded CA certificates.");
    Ok(store)
}

/// Parses a server name to verify broker certificates against, when it differs from the host in the submission URL.
///
/// # Errors
///
/// If the name is neither a valid DNS name nor an IP address, an error will be returned.
pub fn parse_server_name(name: &str) -> Result<ServerName<'static>, GenericError> {
    ServerName::try_from(name.to_string()).map_err(|e| generic_error!("Invalid TLS server name '{}': {}", name, e))
}

/// Initializes the default TLS cryptography provider used by `rustls`.
///
/// This explicitly sets the [AWS-LC][aws_lc] provider as the default provider for all future TLS configurations, which
/// provides the ability to run in FIPS mode for FIPS-compliant builds.
///
/// # Errors
///
/// If the default cryptography provider has already been set, an error will be returned.
///
/// [aws_lc]: https://github.com/aws/aws-lc-rs
pub fn initialize_default_crypto_provider() -> Result<(), GenericError> {
    if DEFAULT_CRYPTO_PROVIDER_SET.get().is_some() {
        return Err(generic_error!("Default TLS cryptography provider already initialized."));
    }

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| generic_error!("Failed to install AWS-LC as default cryptography provider. This is likely due to a conflicting provider already being installed."))?;

    // A concurrent caller may have won the race; the provider is installed either way.
    let _ = DEFAULT_CRYPTO_PROVIDER_SET.set(());

    Ok(())
}

/// Initializes the default root certificate store from the platform's native certificate store.
///
/// Honors the `SSL_CERT_FILE` and `SSL_CERT_DIR` environment variables: if either is set, certificates are only loaded
/// from the locations they point to.
///
/// # Errors
///
/// If the platform's certificates cannot be loaded, or none of them are usable, an error will be returned.
pub fn load_platform_root_certificates() -> Result<(), GenericError> {
    let _guard = DEFAULT_ROOT_CERT_STORE_MUTEX
        .lock()
        .map_err(|_| generic_error!("Default TLS root certificate store update lock poisoned."))?;
    if DEFAULT_ROOT_CERT_STORE.get().is_some() {
        return Err(generic_error!("Default TLS root certificate store already initialized."));
    }

    let result = rustls_native_certs::load_native_certs();
    if !result.errors.is_empty() {
        let joined_errors = result
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        return Err(generic_error!(
            "Failed to load certificates from platform's native certificate store: {}",
            joined_errors
        ));
    }

    let mut root_cert_store = RootCertStore::empty();
    let (added, failed) = root_cert_store.add_parsable_certificates(result.certs);
    if added == 0 {
        return Err(generic_error!(
            "Failed to add any certificates from environment to the default root certificate store."
        ));
    }
    debug!(added, failed, "Initialized default root certificate store.");

    // Only set here, while holding the mutex, after checking it wasn't already set.
    let _ = DEFAULT_ROOT_CERT_STORE.set(Arc::new(root_cert_store));

    Ok(())
}
