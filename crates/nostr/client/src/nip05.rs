//! DNS identifier lookup over HTTPS.

use crate::error::{ClientError, Result};
use spore::nip05::{DnsIdentifiedUser, DnsIdentifier, Nip05Error, WELL_KNOWN_PATH};
use tracing::debug;

/// Look up `handle@domain` at `https://domain/.well-known/nostr.json`.
pub async fn verify(identifier: &str) -> Result<DnsIdentifiedUser> {
    let http = reqwest::Client::builder()
        .build()
        .map_err(|error| ClientError::Http(error.to_string()))?;
    verify_with(&http, identifier).await
}

pub async fn verify_with(http: &reqwest::Client, identifier: &str) -> Result<DnsIdentifiedUser> {
    let parsed = DnsIdentifier::parse(identifier)?;
    let base_url = format!("https://{}", parsed.domain);
    fetch(http, &parsed, &base_url).await
}

/// Same lookup against an explicit origin such as `http://127.0.0.1:8080`.
pub async fn verify_at(
    http: &reqwest::Client,
    identifier: &str,
    base_url: &str,
) -> Result<DnsIdentifiedUser> {
    let parsed = DnsIdentifier::parse(identifier)?;
    fetch(http, &parsed, base_url.trim_end_matches('/')).await
}

async fn fetch(
    http: &reqwest::Client,
    identifier: &DnsIdentifier,
    base_url: &str,
) -> Result<DnsIdentifiedUser> {
    let url = format!("{base_url}{WELL_KNOWN_PATH}");
    debug!("resolving {} via {}", identifier, url);

    let response = http
        .get(&url)
        .query(&[("name", identifier.handle.as_str())])
        .send()
        .await
        .map_err(|error| ClientError::Http(error.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Nip05Error::ValidationError(format!("{url} returned {status}")).into());
    }
    let body = response
        .bytes()
        .await
        .map_err(|error| ClientError::Http(error.to_string()))?;

    Ok(identifier.resolve(&body)?)
}
