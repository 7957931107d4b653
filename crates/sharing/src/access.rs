//! Interprets the opaque access token segment of a shareable URL.

use http::StatusCode;
use linkgate_store::Access;

use crate::auth::AuthServiceConfig;
use crate::error::Error;

/// Version byte of serialized access grants.
const VERSION_GRANT: u8 = 0;
/// Version byte of access key ids.
const VERSION_ACCESS_KEY_ID: u8 = 1;

/// Parse an access token into an access grant.
///
/// Grants (version 0) are self-contained; access key ids (version 1) are
/// exchanged at the auth service, and only public keys are accepted.
pub(crate) async fn parse_access(
    token: &str,
    auth: &AuthServiceConfig,
    client: &reqwest::Client,
) -> Result<Access, Error> {
    let decoded = bs58::decode(token)
        .with_check(None)
        .into_vec()
        .map_err(|_| Error::msg("invalid access").with_status(StatusCode::BAD_REQUEST))?;

    match decoded.first() {
        Some(&VERSION_GRANT) => parse_grant(token),
        Some(&VERSION_ACCESS_KEY_ID) => {
            let resolved = auth.resolve(client, token).await?;
            if !resolved.public {
                return Err(Error::msg("non-public access key id")
                    .with_status(StatusCode::FORBIDDEN));
            }
            parse_grant(&resolved.access_grant)
        }
        _ => Err(Error::msg("invalid access").with_status(StatusCode::BAD_REQUEST)),
    }
}

/// Parse a serialized access grant, mapping failures to a bad request.
pub(crate) fn parse_grant(serialized: &str) -> Result<Access, Error> {
    Access::parse(serialized)
        .map_err(|_| Error::msg("invalid access").with_status(StatusCode::BAD_REQUEST))
}
