//! ClamAV daemon client.
//!
//! Streams bytes to clamd over TCP (INSTREAM) and interprets the verdict.
//! A network or protocol failure is an [`ScanVerdict::Error`], distinct from
//! an infected verdict: the scan worker retries errors but treats infected
//! as terminal. The scanner is stateless from the pipeline's perspective.

use clamav_client::{clean, Tcp};
use std::str;
use std::time::{Duration, Instant};

use picshelf_core::ScannerConfig;

#[derive(Clone)]
pub struct ClamAvScanner {
    host: String,
    port: u16,
    /// Timeout in seconds for each scan operation
    timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected(String),
    Error(String),
}

impl ClamAvScanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout_secs: config.timeout_secs,
        }
    }

    /// Scan in-memory data. Uses the sync client inside `spawn_blocking` to
    /// avoid holding the async runtime on socket I/O.
    pub async fn scan_bytes(&self, data: &[u8]) -> ScanVerdict {
        let start = Instant::now();
        tracing::debug!(host = %self.host, port = %self.port, "Starting ClamAV scan");
        let data = data.to_vec();
        let host = self.host.clone();
        let port = self.port;
        let timeout_secs = self.timeout_secs;

        let result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            tokio::task::spawn_blocking(move || {
                let address = format!("{}:{}", host, port);
                let connection = Tcp {
                    host_address: address.as_str(),
                };
                match clamav_client::scan_buffer(data.as_slice(), connection, None) {
                    Ok(response_bytes) => match clean(&response_bytes) {
                        Ok(true) => {
                            tracing::info!(
                                duration_ms = start.elapsed().as_millis(),
                                "Scan completed: clean"
                            );
                            ScanVerdict::Clean
                        }
                        Ok(false) => {
                            let response_str = match str::from_utf8(&response_bytes) {
                                Ok(s) => s.trim(),
                                Err(_) => "unknown",
                            };
                            let signature = if response_str.contains("FOUND") {
                                response_str
                                    .split(':')
                                    .nth(1)
                                    .unwrap_or("unknown")
                                    .split_whitespace()
                                    .next()
                                    .unwrap_or("unknown")
                                    .to_string()
                            } else {
                                "unknown".to_string()
                            };
                            tracing::warn!(
                                duration_ms = start.elapsed().as_millis(),
                                signature = %signature,
                                "Scan detected malware"
                            );
                            ScanVerdict::Infected(signature)
                        }
                        Err(e) => {
                            let error_msg = format!("Failed to parse ClamAV response: {}", e);
                            tracing::error!(error = %error_msg, "ClamAV protocol error");
                            ScanVerdict::Error(error_msg)
                        }
                    },
                    Err(e) => {
                        let error_msg = format!("ClamAV scan error: {}", e);
                        tracing::error!(error = %error_msg, "ClamAV scan failed");
                        ScanVerdict::Error(error_msg)
                    }
                }
            }),
        )
        .await;

        match result {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                let error_msg = format!("ClamAV scan task join error: {}", e);
                tracing::error!(error = %error_msg, "ClamAV scan panicked");
                ScanVerdict::Error(error_msg)
            }
            Err(_) => {
                let error_msg = format!("ClamAV scan timeout (exceeded {} seconds)", timeout_secs);
                tracing::error!(error = %error_msg, "ClamAV scan timeout");
                ScanVerdict::Error(error_msg)
            }
        }
    }

    /// Liveness probe against the daemon.
    pub async fn ping(&self) -> Result<(), anyhow::Error> {
        let host = self.host.clone();
        let port = self.port;

        let response = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            tokio::task::spawn_blocking(move || {
                let address = format!("{}:{}", host, port);
                let connection = Tcp {
                    host_address: address.as_str(),
                };
                clamav_client::ping(connection)
            }),
        )
        .await
        .map_err(|_| anyhow::anyhow!("ClamAV ping timeout"))?
        .map_err(|e| anyhow::anyhow!("ClamAV ping task join error: {}", e))?
        .map_err(|e| anyhow::anyhow!("ClamAV ping failed: {}", e))?;

        if response.starts_with(b"PONG") {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Unexpected ClamAV ping response: {:?}",
                String::from_utf8_lossy(&response)
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_constructor() {
        let config = ScannerConfig {
            host: "localhost".to_string(),
            port: 3310,
            timeout_secs: 30,
            enabled: true,
        };
        let scanner = ClamAvScanner::new(&config);
        assert_eq!(scanner.host, "localhost");
        assert_eq!(scanner.timeout_secs, 30);
    }

    #[test]
    fn verdict_distinguishes_error_from_infected() {
        let infected = ScanVerdict::Infected("Eicar-Signature".to_string());
        let error = ScanVerdict::Error("connection refused".to_string());
        assert_ne!(infected, error);
        assert_ne!(infected, ScanVerdict::Clean);
    }
}
