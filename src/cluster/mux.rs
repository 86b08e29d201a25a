//! Port multiplexer (spec.md §4.3).
//!
//! A single listening socket carries several logical protocols,
//! distinguished by the first byte of each accepted connection. No
//! equivalent exists in the teacher's tree (its `networking/transport`
//! stack binds one socket per protocol), so this is grounded directly in
//! spec.md's description and the mux behaviour exercised by
//! `original_source/cluster/service_mux_test.go` (`mux.Listen(byte)`,
//! `TLSMux` with `InsecureSkipVerify`).

use crate::error::{DbError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Either a bare TCP stream or one wrapped in a completed TLS handshake.
pub enum MuxStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl tokio::io::AsyncRead for MuxStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            MuxStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            MuxStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for MuxStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MuxStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            MuxStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }
    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            MuxStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
            MuxStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_flush(cx),
        }
    }
    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            MuxStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            MuxStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A handle returned by [`Mux::listen`]. `accept` yields connections already
/// stripped of their header byte.
pub struct MuxListener {
    rx: Mutex<mpsc::Receiver<MuxStream>>,
}

impl MuxListener {
    pub async fn accept(&self) -> Option<MuxStream> {
        self.rx.lock().await.recv().await
    }
}

/// Demultiplexes one listening socket by the first byte of each accepted
/// connection.
pub struct Mux {
    registry: Arc<Mutex<HashMap<u8, mpsc::Sender<MuxStream>>>>,
    tls_acceptor: Option<TlsAcceptor>,
    /// Signals `serve`'s accept loop to stop, the teacher's own shutdown
    /// idiom (`enterprise/lifecycle.rs`'s `shutdown_signal: Arc<Notify>`,
    /// `notify_waiters()` on shutdown).
    shutdown: Arc<Notify>,
}

impl Mux {
    pub fn new() -> Self {
        Self { registry: Arc::new(Mutex::new(HashMap::new())), tls_acceptor: None, shutdown: Arc::new(Notify::new()) }
    }

    /// Builds a TLS-terminating mux from a PEM cert chain and key.
    pub fn new_tls(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut std::io::Cursor::new(cert_pem))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| DbError::Configuration(format!("bad TLS cert: {e}")))?;
        let key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut std::io::Cursor::new(key_pem))
                .map_err(|e| DbError::Configuration(format!("bad TLS key: {e}")))?
                .ok_or_else(|| DbError::Configuration("no private key found".to_string()))?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| DbError::Configuration(format!("bad TLS config: {e}")))?;
        Ok(Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            tls_acceptor: Some(TlsAcceptor::from(Arc::new(config))),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Registers a logical listener on `header_byte`. Calling this twice
    /// for the same byte replaces the previous registration.
    pub async fn listen(&self, header_byte: u8) -> MuxListener {
        let (tx, rx) = mpsc::channel(64);
        self.registry.lock().await.insert(header_byte, tx);
        MuxListener { rx: Mutex::new(rx) }
    }

    /// Closes the mux: drops every registered listener's sender, so each
    /// `MuxListener::accept` in progress or still to come returns `None`
    /// instead of hanging (spec.md §8 invariant 6), and stops `serve`'s
    /// accept loop. Connections already dispatched to a listener are left
    /// to finish on their own.
    pub async fn close(&self) {
        self.registry.lock().await.clear();
        self.shutdown.notify_waiters();
    }

    /// Runs the accept loop against `listener` until it errors, is closed,
    /// or `close` is called. Each accepted connection is handed to its own
    /// task for the (blocking) header-byte read and TLS handshake, so a
    /// slow or hostile client cannot starve other connections (spec.md §4.3).
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, _addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!("mux accept error: {e}");
                            break;
                        }
                    };
                    let mux = self.clone();
                    tokio::spawn(async move {
                        mux.dispatch(socket).await;
                    });
                }
                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, socket: TcpStream) {
        let mut stream = if let Some(acceptor) = &self.tls_acceptor {
            match acceptor.accept(socket).await {
                Ok(tls) => MuxStream::Tls(Box::new(tls)),
                Err(e) => {
                    tracing::debug!("mux TLS handshake failed: {e}");
                    return;
                }
            }
        } else {
            MuxStream::Plain(socket)
        };

        let mut header = [0u8; 1];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }

        let sender = self.registry.lock().await.get(&header[0]).cloned();
        match sender {
            Some(sender) => {
                let _ = sender.send(stream).await;
            }
            None => {
                tracing::debug!("mux: no listener registered for byte {}", header[0]);
                let _ = stream.shutdown().await;
            }
        }
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::frame::{read_frame, write_frame};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn routes_by_header_byte() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mux = Arc::new(Mux::new());
        let x = mux.listen(1).await;
        let y = mux.listen(2).await;
        tokio::spawn(mux.clone().serve(listener));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(&[2u8]).await.unwrap();
        write_frame(&mut conn, b"payload").await.unwrap();

        let mut routed = y.accept().await.unwrap();
        let got = read_frame(&mut routed).await.unwrap();
        assert_eq!(got, b"payload");

        // x never receives anything; give it a moment then confirm empty.
        let nothing = tokio::time::timeout(std::time::Duration::from_millis(50), x.accept()).await;
        assert!(nothing.is_err());
    }

    /// spec.md §8 invariant 6: closing the mux unblocks every registered
    /// listener's `accept` with `None` rather than leaving it hanging.
    #[tokio::test]
    async fn close_unblocks_every_registered_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mux = Arc::new(Mux::new());
        let x = mux.listen(1).await;
        let y = mux.listen(2).await;
        let serve_task = tokio::spawn(mux.clone().serve(listener));

        mux.close().await;

        let x_result = tokio::time::timeout(std::time::Duration::from_millis(200), x.accept()).await;
        let y_result = tokio::time::timeout(std::time::Duration::from_millis(200), y.accept()).await;
        assert_eq!(x_result.unwrap(), None);
        assert_eq!(y_result.unwrap(), None);

        // The accept loop itself stops too, instead of leaking a task.
        tokio::time::timeout(std::time::Duration::from_millis(200), serve_task).await.unwrap().unwrap();

        // A connection attempt made after close finds no listener and is
        // dropped cleanly, without hanging the dialer.
        let dial = TcpStream::connect(addr).await;
        if let Ok(mut conn) = dial {
            conn.write_all(&[1u8]).await.ok();
            let mut buf = [0u8; 1];
            let _ = conn.read(&mut buf).await;
        }
    }

    #[tokio::test]
    async fn unregistered_byte_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mux = Arc::new(Mux::new());
        tokio::spawn(mux.serve(listener));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(&[9u8]).await.unwrap();
        let mut buf = [0u8; 1];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
