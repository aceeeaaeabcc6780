//! Shared-secret webhook authentication
//!
//! Providers send `x-public-key` and `x-secret-key` headers. With keys
//! configured, both headers must be present and match exactly. The legacy
//! accept-when-absent compatibility path is gated behind the explicit
//! `allow_unauthenticated` flag and logged loudly when taken.

use crate::config::ProviderConfig;
use crate::errors::{GatewayError, Result};
use actix_web::HttpRequest;
use tracing::warn;

/// Check the shared-secret headers against the configured keys.
pub fn authenticate(
    public_header: Option<&str>,
    secret_header: Option<&str>,
    provider: &ProviderConfig,
) -> Result<()> {
    let (expected_public, expected_secret) = match (&provider.public_key, &provider.secret_key)
    {
        (Some(public), Some(secret)) => (public, secret),
        _ => {
            // validate() refuses this combination at startup unless the
            // operator opted in.
            if provider.allow_unauthenticated {
                warn!("Accepting webhook without configured keys (legacy compatibility)");
                return Ok(());
            }
            return Err(GatewayError::Unauthorized);
        }
    };

    match (public_header, secret_header) {
        (Some(public), Some(secret)) => {
            if public == expected_public && secret == expected_secret {
                Ok(())
            } else {
                Err(GatewayError::Unauthorized)
            }
        }
        (None, None) if provider.allow_unauthenticated => {
            warn!("Accepting webhook with no auth headers (legacy compatibility)");
            Ok(())
        }
        _ => Err(GatewayError::Unauthorized),
    }
}

/// Extract the auth headers from a request and run the check
pub fn authenticate_request(req: &HttpRequest, provider: &ProviderConfig) -> Result<()> {
    let public = header_value(req, "x-public-key");
    let secret = header_value(req, "x-secret-key");
    authenticate(public.as_deref(), secret.as_deref(), provider)
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
