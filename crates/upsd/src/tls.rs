// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! STARTTLS support: acceptor construction from the configured PEM file
//! and a stream wrapper that is either plain TCP or an upgraded TLS
//! session on the same descriptor.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Build an acceptor from `CERTFILE`: a single PEM containing the server
/// certificate chain followed by its private key.
pub fn make_acceptor(certfile: &Path) -> anyhow::Result<TlsAcceptor> {
    let pem = std::fs::read(certfile)
        .with_context(|| format!("can't read certificate file {}", certfile.display()))?;

    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("bad certificate in {}", certfile.display()))?;
    anyhow::ensure!(!certs.is_empty(), "no certificate found in {}", certfile.display());

    let key = rustls_pemfile::private_key(&mut pem.as_slice())
        .with_context(|| format!("bad private key in {}", certfile.display()))?
        .with_context(|| format!("no private key found in {}", certfile.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate/key mismatch")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A client connection, before or after the STARTTLS upgrade.
pub enum ClientStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf).await,
            Self::Tls(s) => s.read(buf).await,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.write_all(buf).await,
            Self::Tls(s) => s.write_all(buf).await,
        }
    }

    /// Run the server-side handshake on this descriptor. The handshake
    /// makes progress as peer bytes arrive and may span several polls.
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> io::Result<Self> {
        match self {
            Self::Plain(stream) => {
                let tls = acceptor.accept(stream).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
            already => Ok(already),
        }
    }
}

#[cfg(test)]
#[path = "tls_tests.rs"]
mod tests;
