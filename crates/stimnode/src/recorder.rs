//! Recording coordinator: brackets each task's capture on the acquisition service.

use std::time::Duration;

use async_trait::async_trait;
use boothproto::{parse_ack, AcquisitionRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::TransportError;

/// Ack replies are short; one read of this size is enough.
const ACK_BUFFER: usize = 1024;

#[async_trait]
pub trait Recorder: Send + Sync {
    /// Ask the acquisition service to start recording, waiting a bounded
    /// time for its acknowledgement.
    async fn start_recording(&self, output_path: &str, task_id: &str) -> Result<String, TransportError>;

    /// Ask the acquisition service to stop. Does not wait for a reply.
    async fn stop_recording(&self) -> Result<(), TransportError>;
}

/// TCP client for the acquisition service. One connection per request.
#[derive(Debug, Clone)]
pub struct AcquisitionClient {
    endpoint: String,
    timeout: Duration,
}

impl AcquisitionClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect_and_send(&self, request: &AcquisitionRequest) -> Result<TcpStream, TransportError> {
        let mut stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let io_err = |source| TransportError::Io {
            endpoint: self.endpoint.clone(),
            source,
        };
        stream
            .write_all(request.to_wire().as_bytes())
            .await
            .map_err(io_err)?;
        // Half-close so the service sees the end of the request.
        stream.shutdown().await.map_err(io_err)?;
        Ok(stream)
    }

    async fn round_trip(&self, request: &AcquisitionRequest) -> Result<String, TransportError> {
        let mut stream = self.connect_and_send(request).await?;

        let mut buf = vec![0u8; ACK_BUFFER];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|source| TransportError::Io {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        parse_ack(&buf[..n]).map_err(|source| TransportError::Ack {
            endpoint: self.endpoint.clone(),
            source,
        })
    }

    fn timed_out(&self) -> TransportError {
        TransportError::Timeout {
            endpoint: self.endpoint.clone(),
            after: self.timeout,
        }
    }
}

#[async_trait]
impl Recorder for AcquisitionClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn start_recording(&self, output_path: &str, task_id: &str) -> Result<String, TransportError> {
        let request = AcquisitionRequest::record_start(output_path, task_id);
        let ack = tokio::time::timeout(self.timeout, self.round_trip(&request))
            .await
            .map_err(|_| self.timed_out())??;
        debug!(%ack, "record_start acknowledged");
        Ok(ack)
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn stop_recording(&self) -> Result<(), TransportError> {
        tokio::time::timeout(
            self.timeout,
            self.connect_and_send(&AcquisitionRequest::RecordStop),
        )
        .await
        .map_err(|_| self.timed_out())??;
        Ok(())
    }
}
