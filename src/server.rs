//! Accept loop, per-connection tasks, TLS and shutdown.
//!
//! Each accepted connection becomes one task in a `JoinSet`, served by the
//! hyper-util auto builder so HTTP/1.1 and HTTP/2 share a port. On SIGTERM,
//! Ctrl-C or the caller's shutdown future the listener is dropped at once;
//! `serve` then waits for the connection tasks already running and returns.

use std::convert::Infallible;
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use crate::service::Pipeline;
use crate::status::Status;

/// The HTTP server. HTTP/1.1 and HTTP/2, optionally over TLS.
pub struct Server {
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
}

impl Server {
    /// Parses `addr` (`host:port`). Nothing is bound until
    /// [`serve`](Server::serve).
    ///
    /// ```rust
    /// assert!(luddite::Server::bind("0.0.0.0:3000").is_ok());
    /// assert!(luddite::Server::bind("widgets").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr.parse().map_err(|_| Error::Addr(addr.to_owned()))?;
        Ok(Self { addr, tls: None })
    }

    /// Terminates TLS with the PEM certificate chain and private key at the
    /// given paths.
    pub fn with_tls(mut self, cert_file: &Path, key_file: &Path) -> Result<Self> {
        let config = load_tls_config(cert_file, key_file)?;
        self.tls = Some(TlsAcceptor::from(config));
        Ok(self)
    }

    /// Serves `pipeline` until SIGTERM or Ctrl-C, then drains in-flight
    /// connections.
    pub async fn serve(self, pipeline: Pipeline) -> Result<()> {
        self.serve_with_shutdown(pipeline, shutdown_signal()).await
    }

    /// Serves `pipeline` until `signal` resolves, then drains in-flight
    /// connections.
    pub async fn serve_with_shutdown(self, pipeline: Pipeline, signal: impl Future<Output = ()>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, tls = self.tls.is_some(), "luddite listening");

        // Tracks every connection task so shutdown can wait for them.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting even when
                // more connections are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let pipeline = pipeline.clone();
                    let tls = self.tls.clone();

                    tasks.spawn(async move {
                        match tls {
                            None => serve_connection(stream, pipeline, peer).await,
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => serve_connection(stream, pipeline, peer).await,
                                Err(e) => warn!(%peer, "TLS handshake failed: {e}"),
                            },
                        }
                    });
                }

                // Reap finished tasks so the JoinSet does not grow without bound.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("luddite stopped");
        Ok(())
    }
}

async fn serve_connection<I>(io: I, pipeline: Pipeline, peer: SocketAddr)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| dispatch(pipeline.clone(), req));

    // `auto::Builder` serves HTTP/1.1 or HTTP/2, whatever the client speaks.
    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(io), svc)
        .await
    {
        error!(%peer, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the pipeline.
///
/// Never fails: an unreadable body is a 400, and a panic that escapes the
/// pipeline (no bottom handler installed) is a bare 500 for this request
/// only.
async fn dispatch(
    pipeline: Pipeline,
    req: hyper::Request<Incoming>,
) -> std::result::Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read request body: {e}");
            return Ok(Response::status(Status::BadRequest).into_hyper());
        }
    };

    let res = match AssertUnwindSafe(pipeline.call(Request::from_parts(parts, body))).catch_unwind().await {
        Ok(res) => res,
        Err(_) => {
            error!("request panicked outside the bottom handler");
            Response::status(Status::InternalServerError)
        }
    };
    Ok(res.into_hyper())
}

// ── TLS ───────────────────────────────────────────────────────────────────────

/// Loads a rustls server config from PEM files. No client authentication.
pub(crate) fn load_tls_config(cert_file: &Path, key_file: &Path) -> Result<Arc<ServerConfig>> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| Error::Tls(format!("cannot open {}: {e}", path.display())))
    };

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut open(cert_file)?)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Tls(format!("invalid certificate file: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates in {}", cert_file.display())));
    }

    let key = rustls_pemfile::private_key(&mut open(key_file)?)
        .map_err(|e| Error::Tls(format!("invalid key file: {e}")))?
        .ok_or_else(|| Error::Tls(format!("no private key in {}", key_file.display())))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(Arc::new(config))
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by the Kubernetes
/// control plane) and **SIGINT** (Ctrl-C, for local dev). A signal that
/// cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn bind_rejects_bad_addresses() {
        assert!(matches!(Server::bind("not-an-addr"), Err(Error::Addr(_))));
        assert!(Server::bind("127.0.0.1:0").is_ok());
    }

    #[test]
    fn tls_config_reports_missing_and_empty_files() {
        let missing = Path::new("/nonexistent/cert.pem");
        assert!(matches!(load_tls_config(missing, missing), Err(Error::Tls(_))));

        let mut empty = tempfile::NamedTempFile::new().unwrap();
        writeln!(empty, "not a pem file").unwrap();
        let err = load_tls_config(empty.path(), empty.path()).unwrap_err();
        assert!(matches!(err, Error::Tls(ref msg) if msg.starts_with("no certificates")));
    }
}
