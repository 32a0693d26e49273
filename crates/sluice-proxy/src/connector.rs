//! TCP connector with optional TLS upgrade for `https` backends

use hyper::rt::{Read, ReadBufCursor, Write};
use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use pin_project::pin_project;
use rustls::pki_types::ServerName;
use sluice_core::BoxError;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tower::Service;

/// Backend connection, plain or TLS
#[pin_project(project = MaybeHttpsProj)]
pub enum MaybeHttpsStream {
    /// Plain TCP
    Http(#[pin] TokioIo<TcpStream>),
    /// TLS over TCP
    Https(#[pin] TokioIo<TlsStream<TcpStream>>),
}

impl fmt::Debug for MaybeHttpsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeHttpsStream::Http(_) => f.write_str("Http(..)"),
            MaybeHttpsStream::Https(_) => f.write_str("Https(..)"),
        }
    }
}

impl Read for MaybeHttpsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeHttpsProj::Http(s) => s.poll_read(cx, buf),
            MaybeHttpsProj::Https(s) => s.poll_read(cx, buf),
        }
    }
}

impl Write for MaybeHttpsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MaybeHttpsProj::Http(s) => s.poll_write(cx, buf),
            MaybeHttpsProj::Https(s) => s.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeHttpsProj::Http(s) => s.poll_flush(cx),
            MaybeHttpsProj::Https(s) => s.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeHttpsProj::Http(s) => s.poll_shutdown(cx),
            MaybeHttpsProj::Https(s) => s.poll_shutdown(cx),
        }
    }
}

impl Connection for MaybeHttpsStream {
    fn connected(&self) -> Connected {
        match self {
            MaybeHttpsStream::Http(s) => s.inner().connected(),
            MaybeHttpsStream::Https(s) => s.inner().get_ref().0.connected(),
        }
    }
}

/// Connector handed to the pooled hyper client
#[derive(Clone)]
pub struct HttpsConnector {
    http: HttpConnector,
    tls: TlsConnector,
}

impl HttpsConnector {
    /// Wrap a TCP connector; `https` URIs are upgraded with `tls`
    pub fn new(mut http: HttpConnector, tls: Arc<rustls::ClientConfig>) -> Self {
        http.enforce_http(false);
        Self {
            http,
            tls: TlsConnector::from(tls),
        }
    }
}

impl fmt::Debug for HttpsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsConnector").finish_non_exhaustive()
    }
}

impl Service<Uri> for HttpsConnector {
    type Response = MaybeHttpsStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<MaybeHttpsStream, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let is_https = uri.scheme_str() == Some("https");
        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string());
        let connecting = self.http.call(uri);
        let tls = self.tls.clone();

        Box::pin(async move {
            let tcp = connecting.await.map_err(BoxError::from)?;
            if !is_https {
                return Ok(MaybeHttpsStream::Http(tcp));
            }
            upgrade(tls, host, tcp).await
        })
    }
}

async fn upgrade(
    tls: TlsConnector,
    host: Option<String>,
    tcp: TokioIo<TcpStream>,
) -> Result<MaybeHttpsStream, BoxError> {
    let host = host.ok_or("https URI without host")?;
    let server_name = ServerName::try_from(host.as_str())?.to_owned();
    let stream = tls.connect(server_name, tcp.into_inner()).await?;
    Ok(MaybeHttpsStream::Https(TokioIo::new(stream)))
}
