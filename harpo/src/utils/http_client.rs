use std::{sync::OnceLock, time::Duration};

use reqwest::Client;
use tracing::debug;

use crate::Result;

/// Default timeout for outgoing notification requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the HTTP client used by webhook-style notification providers.
pub fn build_client(timeout: Duration) -> Result<Client> {
    install_rustls_provider();
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("harpo/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
