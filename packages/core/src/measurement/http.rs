use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time::{timeout_at, Instant};

use crate::config::SpeedTestConfig;
use crate::measurement::{mbps, MeasurementError, SpeedMeasurement, SpeedSample};

/// Upload payloads are sent as successive POSTs of at most this many bytes,
/// so a phase cut short by its deadline still reports what got through.
pub const UPLOAD_CHUNK_BYTES: usize = 256 * 1024;

/// Measures throughput by timing a download from and an upload to plain
/// HTTP endpoints.
///
/// Each phase runs against its own deadline of `config.timeout`. A phase
/// that hits the deadline after moving some bytes reports the rate for
/// those bytes; only a phase that moved nothing fails with
/// [`MeasurementError::Timeout`].
#[derive(Clone)]
pub struct HttpSpeedTester {
    config: SpeedTestConfig,
    http: Client,
}

impl HttpSpeedTester {
    pub fn new(config: SpeedTestConfig) -> Result<Self, MeasurementError> {
        let http = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|err| MeasurementError::network(err.to_string()))?;

        Ok(Self { config, http })
    }

    async fn measure_download(&self) -> Result<f64, MeasurementError> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        let mut response = timeout_at(deadline, self.http.get(&self.config.download_url).send())
            .await
            .map_err(|_| MeasurementError::Timeout)?
            .map_err(map_reqwest_error)?;
        check_status(response.status(), "download")?;

        let mut received: u64 = 0;
        loop {
            match timeout_at(deadline, response.chunk()).await {
                Ok(Ok(Some(chunk))) => received += chunk.len() as u64,
                Ok(Ok(None)) => break,
                Ok(Err(err)) => return Err(map_reqwest_error(err)),
                Err(_) if received == 0 => return Err(MeasurementError::Timeout),
                Err(_) => {
                    tracing::debug!("Download cut at deadline after {} bytes", received);
                    break;
                }
            }
        }

        if received == 0 {
            return Err(MeasurementError::format("download endpoint returned no data"));
        }

        Ok(mbps(received, elapsed_secs(started)))
    }

    async fn measure_upload(&self) -> Result<f64, MeasurementError> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        let mut sent: u64 = 0;
        let mut remaining = self.config.upload_bytes;
        while remaining > 0 {
            let len = remaining.min(UPLOAD_CHUNK_BYTES);
            match timeout_at(deadline, self.post_chunk(len)).await {
                Ok(result) => result?,
                Err(_) if sent == 0 => return Err(MeasurementError::Timeout),
                Err(_) => {
                    tracing::debug!("Upload cut at deadline after {} bytes", sent);
                    break;
                }
            }
            sent += len as u64;
            remaining -= len;
        }

        Ok(mbps(sent, elapsed_secs(started)))
    }

    async fn post_chunk(&self, len: usize) -> Result<(), MeasurementError> {
        let response = self
            .http
            .post(&self.config.upload_url)
            .body(vec![0u8; len])
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response.status(), "upload")?;

        // Drain the acknowledgement so the timing covers the full exchange.
        response.bytes().await.map_err(map_reqwest_error)?;
        Ok(())
    }
}

fn elapsed_secs(started: Instant) -> f64 {
    started.elapsed().max(Duration::from_micros(1)).as_secs_f64()
}

#[async_trait]
impl SpeedMeasurement for HttpSpeedTester {
    async fn measure(&self) -> Result<SpeedSample, MeasurementError> {
        let download_mbps = self.measure_download().await?;
        let upload_mbps = self.measure_upload().await?;

        Ok(SpeedSample {
            download_mbps,
            upload_mbps,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn check_status(status: StatusCode, phase: &str) -> Result<(), MeasurementError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(MeasurementError::service_unavailable(format!(
            "{} endpoint returned HTTP {}",
            phase, status
        )))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> MeasurementError {
    if err.is_timeout() {
        MeasurementError::Timeout
    } else {
        MeasurementError::network(err.to_string())
    }
}
