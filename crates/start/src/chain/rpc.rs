//! Minimal JSON-RPC client used to probe the local chain.

use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between readiness probes.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn create_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> anyhow::Result<T> {
    let response: Value = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    parse_response(method, response)
}

fn parse_response<T: DeserializeOwned>(method: &str, mut response: Value) -> anyhow::Result<T> {
    if let Some(error) = response.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result = response
        .get_mut("result")
        .map(Value::take)
        .context("No result in response")?;

    serde_json::from_value(result).with_context(|| format!("Failed to deserialize {} result", method))
}

/// Query `eth_chainId`.
pub async fn chain_id(client: &reqwest::Client, url: &str) -> anyhow::Result<u64> {
    let hex: String = json_rpc_call(client, url, "eth_chainId", vec![]).await?;
    parse_quantity(&hex)
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(hex: &str) -> anyhow::Result<u64> {
    let digits = hex
        .strip_prefix("0x")
        .with_context(|| format!("Quantity '{}' is missing the 0x prefix", hex))?;
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hex quantity '{}'", hex))
}

/// Poll `check_fn` until it succeeds or `timeout` elapses.
pub async fn wait_until_ready<F, Fut>(name: &str, timeout: Duration, check_fn: F) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let start = std::time::Instant::now();

    loop {
        match check_fn().await {
            Ok(()) => return Ok(()),
            Err(e) if start.elapsed() >= timeout => {
                return Err(e.context(format!("Timeout waiting for {} to be ready", name)));
            }
            Err(e) => {
                tracing::trace!(error = %e, service = %name, "Readiness check failed, retrying...");
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x7a69").unwrap(), 31337);
        assert_eq!(parse_quantity("0x1").unwrap(), 1);
        assert!(parse_quantity("7a69").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_parse_response_result() {
        let response = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": "0x7a69" });
        let result: String = parse_response("eth_chainId", response).unwrap();
        assert_eq!(result, "0x7a69");
    }

    #[test]
    fn test_parse_response_error() {
        let response = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "Method not found" }
        });
        let error = parse_response::<String>("eth_foo", response).unwrap_err();
        assert_eq!(error.to_string(), "RPC error: Method not found");
    }

    #[tokio::test]
    async fn test_wait_until_ready_retries() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;

        wait_until_ready("chain", Duration::from_secs(5), move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("not yet");
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let error = wait_until_ready("chain", Duration::ZERO, || async {
            Err::<(), _>(anyhow::anyhow!("connection refused"))
        })
        .await
        .unwrap_err();

        assert_eq!(error.to_string(), "Timeout waiting for chain to be ready");
        assert_eq!(error.root_cause().to_string(), "connection refused");
    }
}
