// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reachability probes for booted nodes and their cleaning ramdisks.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use tracing::{debug, info};

use crate::config::Credentials;
use crate::expect::{compare, expect_all, ActualMap};
use crate::wait::{PollingTimeoutError, Poller};

/// Answers whether a host accepts a login right now.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionProber: Send + Sync {
    fn can_connect(&self, address: IpAddr, credentials: &Credentials) -> bool;
}

/// Accepts whatever host key the node presents. Nodes are reimaged on every
/// deployment, so there is nothing to pin.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Probes by opening an SSH session and authenticating with a password.
pub struct SshProber {
    rt: tokio::runtime::Runtime,
    port: u16,
    connect_timeout: Duration,
}

impl SshProber {
    pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("creating SSH runtime")?;
        Ok(Self { rt, port: 22, connect_timeout })
    }

    async fn login(
        &self,
        addr: SocketAddr,
        credentials: &Credentials,
    ) -> anyhow::Result<bool> {
        let config = Arc::new(client::Config::default());
        let mut session =
            client::connect(config, addr, AcceptAnyHostKey).await?;
        let authenticated = session
            .authenticate_password(
                credentials.username.as_str(),
                credentials.password.as_str(),
            )
            .await?;
        let disconnected = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
        log_disconnect_failure(addr, disconnected);
        Ok(authenticated)
    }
}

/// The login outcome stands even if the goodbye is lost.
fn log_disconnect_failure(addr: SocketAddr, result: Result<(), russh::Error>) {
    if let Err(error) = result {
        debug!(%addr, %error, "SSH disconnect failed");
    }
}

impl ConnectionProber for SshProber {
    fn can_connect(&self, address: IpAddr, credentials: &Credentials) -> bool {
        let addr = SocketAddr::new(address, self.port);
        let result = self.rt.block_on(async {
            tokio::time::timeout(
                self.connect_timeout,
                self.login(addr, credentials),
            )
            .await
        });

        match result {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                debug!(%addr, user = %credentials.username, "SSH login rejected");
                false
            }
            Ok(Err(error)) => {
                debug!(%addr, %error, "SSH connection failed");
                false
            }
            Err(_) => {
                debug!(%addr, timeout = ?self.connect_timeout, "SSH connection timed out");
                false
            }
        }
    }
}

/// Waits until every host in `addresses` accepts a login (`must_work`) or
/// until none does (`!must_work`).
pub fn check_ssh_connections(
    poller: &Poller,
    prober: &dyn ConnectionProber,
    addresses: &[IpAddr],
    credentials: &Credentials,
    timeout: Duration,
    must_work: bool,
) -> Result<(), PollingTimeoutError> {
    info!(?addresses, must_work, ?timeout, "Checking SSH connections");
    let expected = expect_all(addresses.iter().copied(), must_work);
    poller.wait_until(timeout, || {
        let actual: ActualMap<IpAddr, bool> = addresses
            .iter()
            .map(|addr| (*addr, prober.can_connect(*addr, credentials)))
            .collect();
        compare(&expected, &actual)
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn creds() -> Credentials {
        Credentials {
            username: "cirros".to_string(),
            password: "cubswin:)".to_string(),
        }
    }

    fn quick() -> Poller {
        Poller::new(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn waits_for_hosts_to_come_up() {
        let up: IpAddr = "10.1.0.7".parse().unwrap();
        let late: IpAddr = "10.1.0.8".parse().unwrap();
        let calls = AtomicU32::new(0);

        let mut prober = MockConnectionProber::new();
        prober.expect_can_connect().returning(move |addr, _| {
            addr == up || calls.fetch_add(1, Ordering::SeqCst) >= 2
        });

        check_ssh_connections(
            &quick(),
            &prober,
            &[up, late],
            &creds(),
            Duration::from_secs(5),
            true,
        )
        .unwrap();
    }

    #[test]
    fn unreachable_host_times_out_naming_it() {
        let addr: IpAddr = "10.1.0.9".parse().unwrap();
        let mut prober = MockConnectionProber::new();
        prober.expect_can_connect().return_const(false);

        let err = check_ssh_connections(
            &quick(),
            &prober,
            &[addr],
            &creds(),
            Duration::from_millis(10),
            true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("10.1.0.9"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_disconnect_is_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let addr: SocketAddr = "10.1.0.7:22".parse().unwrap();
        tracing::subscriber::with_default(subscriber, || {
            log_disconnect_failure(addr, Ok(()));
            log_disconnect_failure(addr, Err(russh::Error::Disconnect));
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone())
            .unwrap();
        assert_eq!(logs.matches("SSH disconnect failed").count(), 1, "{logs}");
        assert!(logs.contains("10.1.0.7:22"), "{logs}");
        assert!(logs.contains("Disconnected"), "{logs}");
    }

    #[test]
    fn expecting_no_connection() {
        let mut prober = MockConnectionProber::new();
        prober.expect_can_connect().return_const(false);

        check_ssh_connections(
            &quick(),
            &prober,
            &["10.1.0.9".parse().unwrap()],
            &creds(),
            Duration::ZERO,
            false,
        )
        .unwrap();
    }
}
