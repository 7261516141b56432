/*
 *  Copyright 2025 Herald Developers
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Apple Push Notification service, legacy binary protocol.
//!
//! Notifications are written as enhanced frames (command 1). The gateway only
//! answers on error, with a six byte error response, and then closes the
//! connection; silence for `ack_window` after a write is treated as acceptance.
//! The feedback service streams `(time, token)` tuples for devices that no
//! longer accept notifications, then closes.
//!
//! Byte streams come from a [`StreamConnector`]. With the `tls` feature the
//! default provider uses [`TlsConnector`](super::tls::TlsConnector), which
//! presents the application's certificate. [`TcpConnector`] opens plain TCP
//! connections for gateways that do not speak TLS, such as local test servers.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{FeedbackStream, FeedbackTuple, GatewayResponse, GatewaySession, Provider};
use crate::error::{ConnectError, TransportError};
use crate::models::{App, Credentials, Environment, Notification, ProviderKind};

/// Enhanced notification frame command byte.
pub const COMMAND_NOTIFICATION: u8 = 1;
/// Error response command byte.
pub const COMMAND_ERROR: u8 = 8;
/// Largest payload the gateway accepts.
pub const MAX_PAYLOAD_BYTES: usize = 256;
pub const TOKEN_BYTES: usize = 32;
pub const ERROR_RESPONSE_BYTES: usize = 6;

pub const STATUS_INVALID_TOKEN_SIZE: u8 = 5;
pub const STATUS_INVALID_PAYLOAD_SIZE: u8 = 7;
pub const STATUS_INVALID_TOKEN: u8 = 8;
pub const STATUS_SHUTDOWN: u8 = 10;

/// A host and port to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: &'static str,
    pub port: u16,
}

impl Endpoint {
    pub fn gateway(environment: Environment) -> Self {
        match environment {
            Environment::Production => Endpoint {
                host: "gateway.push.apple.com",
                port: 2195,
            },
            Environment::Sandbox => Endpoint {
                host: "gateway.sandbox.push.apple.com",
                port: 2195,
            },
        }
    }

    pub fn feedback(environment: Environment) -> Self {
        match environment {
            Environment::Production => Endpoint {
                host: "feedback.push.apple.com",
                port: 2196,
            },
            Environment::Sandbox => Endpoint {
                host: "feedback.sandbox.push.apple.com",
                port: 2196,
            },
        }
    }
}

/// Human readable text for an APNs status code.
pub fn status_description(status: u8) -> &'static str {
    match status {
        0 => "No errors encountered",
        1 => "Processing error",
        2 => "Missing device token",
        3 => "Missing topic",
        4 => "Missing payload",
        5 => "Invalid token size",
        6 => "Invalid topic size",
        7 => "Invalid payload size",
        8 => "Invalid token",
        10 => "Shutdown",
        _ => "None (unknown)",
    }
}

/// A bidirectional byte stream to an APNs host.
pub trait ApnsStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ApnsStream for T {}

pub type BoxedStream = Box<dyn ApnsStream>;

/// Opens byte streams to APNs hosts on behalf of an application.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<BoxedStream, ConnectError>;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl StreamConnector for TcpConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<BoxedStream, ConnectError> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((endpoint.host, endpoint.port)),
        )
        .await
        .map_err(|_| {
            ConnectError::Transient(format!(
                "connecting to {}:{} timed out after {:?}",
                endpoint.host, endpoint.port, self.connect_timeout
            ))
        })??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Why a notification could not be framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeRejection {
    pub status: u8,
}

/// Encodes an enhanced notification frame:
/// `[1][id u32][expiry u32][32u16][token][len u16][payload]`, big endian.
pub fn encode_notification(notification: &Notification) -> Result<Vec<u8>, EncodeRejection> {
    let token = hex::decode(notification.device_token.trim()).map_err(|_| EncodeRejection {
        status: STATUS_INVALID_TOKEN,
    })?;
    if token.len() != TOKEN_BYTES {
        return Err(EncodeRejection {
            status: STATUS_INVALID_TOKEN_SIZE,
        });
    }

    let payload = notification.payload.to_string().into_bytes();
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(EncodeRejection {
            status: STATUS_INVALID_PAYLOAD_SIZE,
        });
    }

    let identifier = notification.id as u32;
    let expiry = notification
        .expiry
        .map_or(0, |e| e.clamp(0, u32::MAX as i64) as u32);

    let mut frame = Vec::with_capacity(1 + 4 + 4 + 2 + TOKEN_BYTES + 2 + payload.len());
    frame.push(COMMAND_NOTIFICATION);
    frame.extend_from_slice(&identifier.to_be_bytes());
    frame.extend_from_slice(&expiry.to_be_bytes());
    frame.extend_from_slice(&(TOKEN_BYTES as u16).to_be_bytes());
    frame.extend_from_slice(&token);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes `[8][status u8][id u32]` into `(status, identifier)`.
pub fn decode_error_response(
    bytes: &[u8; ERROR_RESPONSE_BYTES],
) -> Result<(u8, u32), TransportError> {
    if bytes[0] != COMMAND_ERROR {
        return Err(TransportError::Protocol(format!(
            "unexpected command {} in error response",
            bytes[0]
        )));
    }
    let identifier = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    Ok((bytes[1], identifier))
}

/// A connection to the APNs gateway.
///
/// Bytes of an error response are buffered across sends, so a response that
/// straddles the end of one acknowledgement window is completed by the next
/// read instead of being lost.
pub struct ApnsSession {
    stream: Option<BoxedStream>,
    ack_window: Duration,
    response: Vec<u8>,
}

impl ApnsSession {
    pub fn new(stream: BoxedStream, ack_window: Duration) -> Self {
        Self {
            stream: Some(stream),
            ack_window,
            response: Vec::with_capacity(ERROR_RESPONSE_BYTES),
        }
    }

    /// Reads until a full error response is buffered or the window closes.
    ///
    /// Returns `Ok(None)` if the window closed first. Each read is appended as
    /// soon as it completes, so nothing is lost when the timeout fires.
    async fn read_error_response(
        &mut self,
    ) -> Result<Option<[u8; ERROR_RESPONSE_BYTES]>, TransportError> {
        let deadline = tokio::time::Instant::now() + self.ack_window;
        while self.response.len() < ERROR_RESPONSE_BYTES {
            let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
            let mut chunk = [0u8; ERROR_RESPONSE_BYTES];
            let wanted = ERROR_RESPONSE_BYTES - self.response.len();
            match tokio::time::timeout_at(deadline, stream.read(&mut chunk[..wanted])).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Err(TransportError::Closed),
                Ok(Ok(read)) => self.response.extend_from_slice(&chunk[..read]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        let mut response = [0u8; ERROR_RESPONSE_BYTES];
        response.copy_from_slice(&self.response);
        self.response.clear();
        Ok(Some(response))
    }

    fn rejected(status: u8) -> GatewayResponse {
        GatewayResponse::Rejected {
            code: Some(status as i32),
            reason: status_description(status).to_string(),
        }
    }
}

#[async_trait]
impl GatewaySession for ApnsSession {
    async fn send(
        &mut self,
        notification: &Notification,
    ) -> Result<GatewayResponse, TransportError> {
        let frame = match encode_notification(notification) {
            Ok(frame) => frame,
            Err(rejection) => return Ok(Self::rejected(rejection.status)),
        };

        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        if let Err(e) = stream.write_all(&frame).await {
            self.stream = None;
            return Err(e.into());
        }
        if let Err(e) = stream.flush().await {
            self.stream = None;
            return Err(e.into());
        }

        let response = match self.read_error_response().await {
            Ok(Some(response)) => response,
            Ok(None) => return Ok(GatewayResponse::Accepted),
            Err(e) => {
                self.stream = None;
                return Err(e);
            }
        };

        // The gateway closes the connection after an error response.
        self.stream = None;
        let (status, identifier) = decode_error_response(&response)?;
        debug!(
            notification_id = notification.id,
            identifier, status, "APNs error response"
        );
        if status == STATUS_SHUTDOWN {
            return Err(TransportError::Closed);
        }
        if identifier != notification.id as u32 {
            warn!(
                notification_id = notification.id,
                identifier,
                status,
                "APNs rejected an earlier notification after its window closed"
            );
            return Err(TransportError::Protocol(format!(
                "error response for notification {} arrived while sending {}",
                identifier, notification.id
            )));
        }
        Ok(Self::rejected(status))
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// A connection to the APNs feedback service.
pub struct ApnsFeedback {
    stream: BoxedStream,
}

impl ApnsFeedback {
    pub fn new(stream: BoxedStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl FeedbackStream for ApnsFeedback {
    async fn next(&mut self) -> Result<Option<FeedbackTuple>, TransportError> {
        let mut header = [0u8; 6];
        let mut filled = 0;
        while filled < header.len() {
            let read = self.stream.read(&mut header[filled..]).await?;
            if read == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(TransportError::Closed)
                };
            }
            filled += read;
        }

        let time = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let token_len = u16::from_be_bytes([header[4], header[5]]) as usize;

        let mut token = vec![0u8; token_len];
        self.stream.read_exact(&mut token).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                TransportError::Io(e)
            }
        })?;

        let invalidated_at = Utc
            .timestamp_opt(time as i64, 0)
            .single()
            .ok_or_else(|| TransportError::Protocol(format!("invalid feedback time {}", time)))?;

        Ok(Some(FeedbackTuple {
            device_token: hex::encode(token),
            invalidated_at,
        }))
    }
}

/// The APNs provider.
pub struct ApnsProvider {
    connector: Arc<dyn StreamConnector>,
    ack_window: Duration,
}

#[cfg(feature = "tls")]
impl Default for ApnsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ApnsProvider {
    /// A provider speaking TLS with the application's certificate and a 200ms
    /// acknowledgement window.
    #[cfg(feature = "tls")]
    pub fn new() -> Self {
        Self::with_connector(Arc::new(super::tls::TlsConnector::default()))
    }

    pub fn with_connector(connector: Arc<dyn StreamConnector>) -> Self {
        Self {
            connector,
            ack_window: Duration::from_millis(200),
        }
    }

    /// How long to wait for an error response before treating a send as accepted.
    pub fn ack_window(mut self, ack_window: Duration) -> Self {
        self.ack_window = ack_window;
        self
    }

    fn check_credentials(app: &App) -> Result<(), ConnectError> {
        match app.credentials.certificate() {
            Some((pem, _)) if !pem.trim().is_empty() => Ok(()),
            Some(_) => Err(ConnectError::Fatal(format!(
                "app '{}' has an empty APNs certificate",
                app.name
            ))),
            None => Err(ConnectError::Fatal(format!(
                "app '{}' has no APNs certificate",
                app.name
            ))),
        }
    }
}

#[async_trait]
impl Provider for ApnsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Apns
    }

    async fn connect(&self, app: &App) -> Result<Box<dyn GatewaySession>, ConnectError> {
        Self::check_credentials(app)?;
        let endpoint = Endpoint::gateway(app.environment);
        let stream = self.connector.connect(&endpoint, &app.credentials).await?;
        debug!(app = %app.name, host = endpoint.host, "Connected to APNs gateway");
        Ok(Box::new(ApnsSession::new(stream, self.ack_window)))
    }

    fn supports_feedback(&self) -> bool {
        true
    }

    async fn open_feedback(&self, app: &App) -> Result<Box<dyn FeedbackStream>, ConnectError> {
        Self::check_credentials(app)?;
        let endpoint = Endpoint::feedback(app.environment);
        let stream = self.connector.connect(&endpoint, &app.credentials).await?;
        Ok(Box::new(ApnsFeedback::new(stream)))
    }
}
