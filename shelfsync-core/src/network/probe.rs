use std::time::Duration;

use async_trait::async_trait;

use super::Probe;

/// Reachability check that issues a `HEAD` request.
///
/// Any HTTP response counts as reachable; only transport failures and
/// timeouts count as offline.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Probe failed");
                false
            }
        }
    }

    fn target(&self) -> &str {
        &self.url
    }
}
