//! TLS.

use harvest_error::{ErrorContext as _, GenericError};
use tracing::warn;

/// Initializes the TLS subsystem.
///
/// Installs AWS-LC as the default cryptography provider and loads the platform's root certificates into the default
/// root certificate store.
///
/// Failing to load the platform root certificates is not fatal, since the broker is commonly reached through its own CA
/// bundle. Any client built without one will fail when it is built instead.
///
/// ## Errors
///
/// If the cryptography provider was already installed, an error will be returned.
pub fn initialize_tls() -> Result<(), GenericError> {
    harvest_tls::initialize_default_crypto_provider()
        .error_context("Failed to initialize TLS cryptography provider.")?;

    if let Err(e) = harvest_tls::load_platform_root_certificates() {
        warn!(error = %e, "Failed to load platform root certificates. Only explicitly configured CA bundles will be usable.");
    }

    Ok(())
}
