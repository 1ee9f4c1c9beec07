// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end harness: runs the daemon in-process on the test's local task
//! set, fakes drivers on real unix sockets, and drives the client protocol
//! over real TCP (optionally upgraded to TLS).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UnixListener};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider. Safe to call repeatedly.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

const DEFAULT_USERS: &str = concat!(
    "[admin]\n",
    "password = adminpass\n",
    "actions = SET FSD\n",
    "instcmds = all\n",
    "\n",
    "[monitor]\n",
    "password = monpass\n",
    "upsmon = primary\n",
);

/// Builder for an in-process daemon with generated configuration files.
pub struct UpsdBuilder {
    maxage: u64,
    tracking_delay: u64,
    tls: bool,
    users: String,
    devices: Vec<(String, String)>,
}

impl Default for UpsdBuilder {
    fn default() -> Self {
        Self {
            maxage: 15,
            tracking_delay: 300,
            tls: false,
            users: DEFAULT_USERS.to_owned(),
            devices: vec![("dev".to_owned(), "dummy-ups".to_owned())],
        }
    }
}

impl UpsdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maxage(mut self, secs: u64) -> Self {
        self.maxage = secs;
        self
    }

    pub fn tracking_delay(mut self, secs: u64) -> Self {
        self.tracking_delay = secs;
        self
    }

    /// Enable STARTTLS with the fixture certificate.
    pub fn tls(mut self) -> Self {
        self.tls = true;
        self
    }

    pub fn device(mut self, name: &str, driver: &str) -> Self {
        self.devices = vec![(name.to_owned(), driver.to_owned())];
        self
    }

    /// Write the config files and bind the fake-driver sockets, but do not
    /// start the daemon yet. Useful when the test scripts the driver side.
    pub fn prepare(self) -> anyhow::Result<Prepared> {
        ensure_crypto();

        let confdir = tempfile::tempdir()?;
        let statepath = confdir.path().join("state");
        std::fs::create_dir(&statepath)?;

        let port = free_port()?;

        let mut upsd_conf = format!(
            "MAXAGE {}\nTRACKINGDELAY {}\nSTATEPATH {}\nLISTEN 127.0.0.1 {port}\n",
            self.maxage,
            self.tracking_delay,
            statepath.display(),
        );
        if self.tls {
            upsd_conf.push_str(&format!("CERTFILE {}\n", fixture("upsd.pem").display()));
        }

        let mut ups_conf = String::new();
        for (name, driver) in &self.devices {
            ups_conf.push_str(&format!(
                "[{name}]\ndriver = {driver}\nport = auto\ndesc = \"test device\"\n"
            ));
        }

        std::fs::write(confdir.path().join("upsd.conf"), upsd_conf)?;
        std::fs::write(confdir.path().join("ups.conf"), ups_conf)?;
        std::fs::write(confdir.path().join("upsd.users"), &self.users)?;

        let mut drivers = Vec::new();
        for (name, driver) in &self.devices {
            drivers.push(FakeDriver::bind(&statepath, driver, name)?);
        }

        Ok(Prepared { confdir, statepath, port, drivers })
    }

    /// Prepare and start the daemon; returns once the TCP port answers.
    pub async fn start(self) -> anyhow::Result<Harness> {
        let prepared = self.prepare()?;
        prepared.start().await
    }
}

/// Configuration on disk plus bound (not yet served) driver sockets.
pub struct Prepared {
    pub confdir: tempfile::TempDir,
    pub statepath: PathBuf,
    pub port: u16,
    pub drivers: Vec<FakeDriver>,
}

impl Prepared {
    pub async fn start(self) -> anyhow::Result<Harness> {
        let config = upsd::config::Config {
            foreground: true,
            debug: 0,
            signal: None,
            chroot: None,
            user: None,
            version: false,
            ipv4: false,
            ipv6: false,
            confpath: self.confdir.path().to_path_buf(),
        };

        tokio::task::spawn_local(async move {
            if let Err(e) = upsd::run(config).await {
                eprintln!("upsd exited: {e:#}");
            }
        });

        // Wait for the listener to come up.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match TcpStream::connect(("127.0.0.1", self.port)).await {
                Ok(probe) => {
                    drop(probe);
                    break;
                }
                Err(_) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => return Err(e).context("daemon never started listening"),
            }
        }

        Ok(Harness {
            port: self.port,
            statepath: self.statepath,
            drivers: self.drivers,
            _confdir: self.confdir,
        })
    }
}

/// A running daemon; dropped (with all its tasks) when the test's LocalSet
/// goes away.
pub struct Harness {
    pub port: u16,
    pub statepath: PathBuf,
    pub drivers: Vec<FakeDriver>,
    _confdir: tempfile::TempDir,
}

impl Harness {
    pub async fn client(&self) -> anyhow::Result<Client> {
        Client::connect(self.port).await
    }

    /// Accept the daemon's connection on the driver socket and answer the
    /// dump with the given variables and commands.
    pub async fn serve_driver(
        &mut self,
        vars: &[(&str, &str)],
        cmds: &[&str],
    ) -> anyhow::Result<DriverConn> {
        let driver = self.drivers.first_mut().context("no fake driver bound")?;
        let mut conn = driver.accept().await?;
        conn.serve_dump(vars, cmds).await?;
        Ok(conn)
    }
}

/// A bound driver-side unix socket the daemon will connect to.
pub struct FakeDriver {
    listener: UnixListener,
}

impl FakeDriver {
    pub fn bind(statepath: &Path, driver: &str, ups: &str) -> anyhow::Result<Self> {
        let path = statepath.join(format!("{driver}-{ups}"));
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("binding fake driver socket {}", path.display()))?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<DriverConn> {
        let accepted = tokio::time::timeout(Duration::from_secs(10), self.listener.accept())
            .await
            .context("daemon never connected to the driver socket")??;
        let (reader, writer) = accepted.0.into_split();
        Ok(DriverConn { reader: BufReader::new(reader), writer })
    }
}

/// One accepted daemon connection, driven by the test script.
pub struct DriverConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DriverConn {
    /// Next line from the daemon (trailing newline stripped).
    pub async fn read_line(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .context("timed out waiting for a daemon line")??;
        anyhow::ensure!(n > 0, "daemon closed the driver socket");
        Ok(line.trim_end_matches('\n').to_owned())
    }

    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(format!("{line}\n").as_bytes()).await?;
        Ok(())
    }

    /// Expect `DUMPALL` and answer with a complete dump.
    pub async fn serve_dump(&mut self, vars: &[(&str, &str)], cmds: &[&str]) -> anyhow::Result<()> {
        let req = self.read_line().await?;
        anyhow::ensure!(req == "DUMPALL", "expected DUMPALL, got {req}");

        for (name, value) in vars {
            self.send(&format!("SETINFO {name} \"{value}\"")).await?;
        }
        for cmd in cmds {
            self.send(&format!("ADDCMD {cmd}")).await?;
        }
        self.send("DUMPDONE").await?;
        self.send("DATAOK").await?;
        Ok(())
    }

    /// Answer any PINGs while the test sleeps, so only real silence makes
    /// the device stale.
    pub async fn answer_pings_for(&mut self, duration: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let mut line = String::new();
            match tokio::time::timeout(deadline - now, self.reader.read_line(&mut line)).await {
                Err(_) => return Ok(()),
                Ok(Ok(0)) => anyhow::bail!("daemon closed the driver socket"),
                Ok(Ok(_)) => {
                    if line.trim_end() == "PING" {
                        self.send("PONG").await?;
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }
}

enum Stream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

/// Test client speaking the line protocol.
pub struct Client {
    stream: Stream,
}

impl Client {
    pub async fn connect(port: u16) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        Ok(Self { stream: Stream::Plain(BufReader::new(stream)) })
    }

    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        let out = format!("{line}\n");
        match &mut self.stream {
            Stream::Plain(s) => s.get_mut().write_all(out.as_bytes()).await?,
            Stream::Tls(s) => s.get_mut().write_all(out.as_bytes()).await?,
        }
        Ok(())
    }

    pub async fn read_line(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), async {
            match &mut self.stream {
                Stream::Plain(s) => s.read_line(&mut line).await,
                Stream::Tls(s) => s.read_line(&mut line).await,
            }
        })
        .await
        .context("timed out waiting for a reply")??;
        anyhow::ensure!(n > 0, "server closed the connection");
        Ok(line.trim_end_matches('\n').to_owned())
    }

    /// Send a request and return its single-line reply.
    pub async fn req(&mut self, line: &str) -> anyhow::Result<String> {
        self.send(line).await?;
        self.read_line().await
    }

    /// Send a LIST request and collect the framed response.
    pub async fn req_list(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        self.send(line).await?;
        let first = self.read_line().await?;
        if first.starts_with("ERR ") {
            anyhow::bail!("{first}");
        }
        anyhow::ensure!(first.starts_with("BEGIN LIST"), "unexpected reply: {first}");

        let mut items = Vec::new();
        loop {
            let item = self.read_line().await?;
            if item.starts_with("END LIST") {
                return Ok(items);
            }
            items.push(item);
        }
    }

    pub async fn authenticate(&mut self, user: &str, pass: &str) -> anyhow::Result<()> {
        anyhow::ensure!(self.req(&format!("USERNAME {user}")).await? == "OK");
        anyhow::ensure!(self.req(&format!("PASSWORD {pass}")).await? == "OK");
        Ok(())
    }

    /// STARTTLS upgrade; certificate verification is disabled because the
    /// fixture cert is self-signed.
    pub async fn starttls(mut self) -> anyhow::Result<Self> {
        let reply = self.req("STARTTLS").await?;
        anyhow::ensure!(reply == "OK STARTTLS", "unexpected reply: {reply}");

        let tcp = match self.stream {
            Stream::Plain(buf) => buf.into_inner(),
            Stream::Tls(_) => anyhow::bail!("already in TLS mode"),
        };

        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify::new()))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let name = rustls::pki_types::ServerName::try_from("localhost")?;
        let tls = connector.connect(name, tcp).await?;

        Ok(Self { stream: Stream::Tls(Box::new(BufReader::new(tls))) })
    }
}

/// Accept-anything certificate verifier for the self-signed test cert.
#[derive(Debug)]
struct NoVerify {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl NoVerify {
    fn new() -> Self {
        Self { provider: Arc::new(rustls::crypto::ring::default_provider()) }
    }
}

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
