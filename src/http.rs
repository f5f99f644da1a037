use crate::error::Result;
use reqwest::blocking::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("plymouth-theme-manager/", env!("CARGO_PKG_VERSION"));

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn client() -> Result<Client> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    Ok(client)
}

/// GETs `url` and fails on any non-2xx status.
pub fn get_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send()?.error_for_status()?;
    Ok(response.bytes()?.to_vec())
}
