use std::time::Duration;

use anyhow::Result;

/// Reads sources that are either `http(s)://` URLs or local paths.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nearby-buses/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub async fn get(&self, location: &str) -> Result<Vec<u8>> {
        if !is_remote(location) {
            // fs_err puts the path in the message
            return Ok(fs_err::tokio::read(location).await?);
        }
        let resp = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|err| anyhow!("{location}: {err}"))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("{location}: HTTP {status}");
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| anyhow!("{location}: {err}"))?;
        Ok(bytes.to_vec())
    }

    /// Tries up to `attempts` times, doubling the pause after each failure.
    pub async fn get_with_retry(
        &self,
        location: &str,
        attempts: usize,
        first_backoff: Duration,
    ) -> Result<Vec<u8>> {
        let mut backoff = first_backoff;
        let mut attempt = 1;
        loop {
            match self.get(location).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if attempt < attempts => {
                    warn!(
                        "Attempt {attempt}/{attempts} failed: {err:#}. Retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
