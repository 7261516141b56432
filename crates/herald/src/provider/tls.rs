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

//! TLS streams authenticated with an application's APNs certificate.

use async_trait::async_trait;
use openssl::error::ErrorStack;
use openssl::pkey::PKey;
use openssl::ssl::{ErrorCode, SslConnector, SslMethod};
use openssl::x509::X509;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tracing::debug;

use super::apns::{BoxedStream, Endpoint, StreamConnector};
use crate::error::ConnectError;
use crate::models::Credentials;

/// Opens TLS connections presenting the application's certificate as the
/// client identity.
///
/// The PEM holds the certificate followed by its private key. The key may be
/// encrypted with the credential's password.
#[derive(Debug, Clone)]
pub struct TlsConnector {
    connect_timeout: Duration,
}

impl Default for TlsConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TlsConnector {
    /// `connect_timeout` bounds the TCP connect and the TLS handshake separately.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Builds an [`SslConnector`] carrying the certificate and key in `credentials`.
    ///
    /// Unreadable or mismatched certificates are fatal.
    pub fn client_identity(credentials: &Credentials) -> Result<SslConnector, ConnectError> {
        let (pem, password) = credentials.certificate().ok_or_else(|| {
            ConnectError::Fatal("APNs credentials must be a certificate".to_string())
        })?;
        let fatal = |what: &str, e: ErrorStack| ConnectError::Fatal(format!("{}: {}", what, e));

        let certificate =
            X509::from_pem(pem.as_bytes()).map_err(|e| fatal("invalid APNs certificate", e))?;
        // An empty passphrase keeps OpenSSL from prompting for unencrypted keys.
        let key = PKey::private_key_from_pem_passphrase(
            pem.as_bytes(),
            password.unwrap_or_default().as_bytes(),
        )
        .map_err(|e| fatal("invalid APNs private key", e))?;

        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| fatal("TLS setup failed", e))?;
        builder
            .set_certificate(&certificate)
            .map_err(|e| fatal("unusable APNs certificate", e))?;
        builder
            .set_private_key(&key)
            .map_err(|e| fatal("unusable APNs private key", e))?;
        builder
            .check_private_key()
            .map_err(|e| fatal("APNs certificate and key do not match", e))?;
        Ok(builder.build())
    }

    fn handshake_error(endpoint: &Endpoint, error: openssl::ssl::Error) -> ConnectError {
        let message = format!(
            "TLS handshake with {}:{} failed: {}",
            endpoint.host, endpoint.port, error
        );
        if error.io_error().is_some() || error.code() == ErrorCode::SYSCALL {
            ConnectError::Transient(message)
        } else {
            ConnectError::Fatal(message)
        }
    }
}

#[async_trait]
impl StreamConnector for TlsConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<BoxedStream, ConnectError> {
        let ssl = Self::client_identity(credentials)?
            .configure()
            .and_then(|config| config.into_ssl(endpoint.host))
            .map_err(|e| ConnectError::Fatal(format!("TLS setup failed: {}", e)))?;

        let tcp = tokio::time::timeout(
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
        tcp.set_nodelay(true)?;

        let mut stream = SslStream::new(ssl, tcp)
            .map_err(|e| ConnectError::Fatal(format!("TLS setup failed: {}", e)))?;
        match tokio::time::timeout(self.connect_timeout, Pin::new(&mut stream).connect()).await {
            Err(_) => Err(ConnectError::Transient(format!(
                "TLS handshake with {}:{} timed out after {:?}",
                endpoint.host, endpoint.port, self.connect_timeout
            ))),
            Ok(Err(e)) => Err(Self::handshake_error(endpoint, e)),
            Ok(Ok(())) => {
                debug!(host = endpoint.host, "TLS session established");
                Ok(Box::new(stream))
            }
        }
    }
}
