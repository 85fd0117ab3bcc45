//! Contains available options to configure the [WebhookServer][crate::WebhookServer].
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use crate::constants::{DEFAULT_SOCKET_ADDR, DEFAULT_TLS_CERT_PATH, DEFAULT_TLS_KEY_PATH};

/// Specifies available webhook server options.
///
/// The [`Default`] implementation for this struct contains the following values:
///
/// - The socket binds to 0.0.0.0 on port 8443 (HTTPS)
/// - The certificate and key are read from the directory the API server
///   conventionally mounts serving certificates into.
///
/// ```
/// use mystatefulset_webhook::WebhookServerOptions;
///
/// let options = WebhookServerOptions::builder()
///     .bind_address([127, 0, 0, 1], 9443)
///     .tls_certificate_path("/etc/webhook/tls.crt")
///     .tls_private_key_path("/etc/webhook/tls.key")
///     .build();
///
/// assert_eq!(options.socket_addr.port(), 9443);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookServerOptions {
    /// The HTTPS socket address the [`TcpListener`][tokio::net::TcpListener]
    /// binds to.
    pub socket_addr: SocketAddr,

    /// PEM file containing the certificate chain presented to clients.
    pub tls_certificate_path: PathBuf,

    /// PEM file containing the private key belonging to the certificate.
    pub tls_private_key_path: PathBuf,
}

impl Default for WebhookServerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WebhookServerOptions {
    /// Returns the default [`WebhookServerOptionsBuilder`] which allows to
    /// selectively customize the options.
    pub fn builder() -> WebhookServerOptionsBuilder {
        WebhookServerOptionsBuilder::default()
    }
}

/// Allows to selectively customize the webhook server [`WebhookServerOptions`].
#[derive(Debug, Default)]
pub struct WebhookServerOptionsBuilder {
    socket_addr: Option<SocketAddr>,
    tls_certificate_path: Option<PathBuf>,
    tls_private_key_path: Option<PathBuf>,
}

impl WebhookServerOptionsBuilder {
    /// Sets the socket address the webhook server uses to bind for HTTPS.
    pub fn bind_address(mut self, bind_ip: impl Into<IpAddr>, bind_port: u16) -> Self {
        self.socket_addr = Some(SocketAddr::new(bind_ip.into(), bind_port));
        self
    }

    /// Sets the IP address of the socket address the webhook server uses to
    /// bind for HTTPS.
    pub fn bind_ip(mut self, bind_ip: impl Into<IpAddr>) -> Self {
        let addr = self.socket_addr.get_or_insert(DEFAULT_SOCKET_ADDR);
        addr.set_ip(bind_ip.into());
        self
    }

    /// Sets the port of the socket address the webhook server uses to bind
    /// for HTTPS.
    pub fn bind_port(mut self, bind_port: u16) -> Self {
        let addr = self.socket_addr.get_or_insert(DEFAULT_SOCKET_ADDR);
        addr.set_port(bind_port);
        self
    }

    pub fn tls_certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_certificate_path = Some(path.into());
        self
    }

    pub fn tls_private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_private_key_path = Some(path.into());
        self
    }

    /// Builds the final [`WebhookServerOptions`] by using default values for
    /// any not explicitly set option.
    pub fn build(self) -> WebhookServerOptions {
        WebhookServerOptions {
            socket_addr: self.socket_addr.unwrap_or(DEFAULT_SOCKET_ADDR),
            tls_certificate_path: self
                .tls_certificate_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TLS_CERT_PATH)),
            tls_private_key_path: self
                .tls_private_key_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TLS_KEY_PATH)),
        }
    }
}
