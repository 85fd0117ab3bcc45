//! A server which terminates TLS connections and hands the decrypted HTTP
//! traffic to an Axum [`Router`].
use std::{net::SocketAddr, path::Path, sync::Arc};

use axum::{Router, extract::Request};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring::default_provider,
        pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
        version::{TLS12, TLS13},
    },
};
use tower::ServiceExt;
use tracing::{Instrument, instrument};

use crate::WebhookServerOptions;

pub type Result<T, E = TlsServerError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum TlsServerError {
    #[snafu(display("failed to read TLS certificate chain from {path:?}"))]
    ReadCertificateChain {
        source: tokio_rustls::rustls::pki_types::pem::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to read TLS private key from {path:?}"))]
    ReadPrivateKey {
        source: tokio_rustls::rustls::pki_types::pem::Error,
        path: std::path::PathBuf,
    },

    #[snafu(display("failed to set safe TLS protocol versions"))]
    SetSafeTlsProtocolVersions { source: tokio_rustls::rustls::Error },

    #[snafu(display("TLS certificate and private key do not form a valid server identity"))]
    SetServerCertificate { source: tokio_rustls::rustls::Error },

    #[snafu(display("failed to create TCP listener by binding to socket address {socket_addr:?}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },
}

/// A server which terminates TLS connections and allows clients to communicate
/// via HTTPS with the underlying HTTP router.
pub struct TlsServer {
    config: ServerConfig,
    socket_addr: SocketAddr,
    router: Router,
}

impl TlsServer {
    #[instrument(name = "create_tls_server", skip(router))]
    pub fn new(options: &WebhookServerOptions, router: Router) -> Result<Self> {
        let certificate_chain = read_certificate_chain(&options.tls_certificate_path)?;
        let private_key = read_private_key(&options.tls_private_key_path)?;

        let mut config = ServerConfig::builder_with_provider(default_provider().into())
            .with_protocol_versions(&[&TLS12, &TLS13])
            .context(SetSafeTlsProtocolVersionsSnafu)?
            .with_no_client_auth()
            .with_single_cert(certificate_chain, private_key)
            .context(SetServerCertificateSnafu)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        Ok(Self {
            config,
            socket_addr: options.socket_addr,
            router,
        })
    }

    /// Runs the TLS server by listening for incoming TCP connections on the
    /// bound socket address. It only accepts TLS connections. Each TLS stream
    /// is served by a Hyper connection calling into the Axum router.
    pub async fn run(self) -> Result<()> {
        let tls_acceptor = TlsAcceptor::from(Arc::new(self.config));
        let tcp_listener = TcpListener::bind(self.socket_addr)
            .await
            .context(BindTcpListenerSnafu {
                socket_addr: self.socket_addr,
            })?;

        tracing::info!(socket_addr = %self.socket_addr, "webhook server listening");

        loop {
            let tls_acceptor = tls_acceptor.clone();
            let router = self.router.clone();

            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok((stream, addr)) => (stream, addr),
                Err(err) => {
                    tracing::trace!(%err, "failed to accept incoming TCP connection");
                    continue;
                }
            };

            let span = tracing::debug_span!("accept tcp connection", client.address = %remote_addr);
            tokio::spawn(
                async move {
                    let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(err) => {
                            tracing::trace!(%err, "error during tls handshake");
                            return;
                        }
                    };

                    // Hyper has its own IO traits, TokioIo bridges them
                    let tls_stream = TokioIo::new(tls_stream);
                    let hyper_service = service_fn(move |request: Request<Incoming>| {
                        router.clone().oneshot(request)
                    });

                    if let Err(err) = Builder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(tls_stream, hyper_service)
                        .await
                    {
                        tracing::warn!(%err, "failed to serve connection");
                    }
                }
                .instrument(span),
            );
        }
    }
}

fn read_certificate_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_file_iter(path)
        .and_then(|certificates| certificates.collect())
        .context(ReadCertificateChainSnafu { path })
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_file(path).context(ReadPrivateKeySnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_certificate_is_reported_with_path() {
        let options = WebhookServerOptions::builder()
            .tls_certificate_path("/does/not/exist/tls.crt")
            .tls_private_key_path("/does/not/exist/tls.key")
            .build();

        let error = TlsServer::new(&options, Router::new())
            .err()
            .expect("server creation must fail without a certificate");

        assert!(matches!(error, TlsServerError::ReadCertificateChain { .. }));
        assert!(error.to_string().contains("/does/not/exist/tls.crt"));
    }
}
