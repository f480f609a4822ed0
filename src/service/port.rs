//! # ServicePort
//!
//! One listening socket, one or more registered services.
//!
//! `open()` resolves the configured bind address (IPv4 literal, then IPv6
//! literal, then DNS preferring an IPv6 result), binds either exactly that
//! address or the wildcard of its family, and keeps a single accept
//! outstanding. Accept failures that are not part of a deliberate shutdown
//! close the port and schedule a re-open on a fixed backoff through the
//! scheduler; sibling listeners are unaffected.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::Connection;
use crate::context::ServerContext;
use crate::error::{Result, TransportError};
use crate::message::NetworkMessage;
use crate::service::Service;

struct Acceptor {
    shutdown_tx: watch::Sender<bool>,
}

pub struct ServicePort {
    services: RwLock<Vec<Arc<dyn Service>>>,
    acceptor: Mutex<Option<Acceptor>>,
    local_addr: Mutex<Option<SocketAddr>>,
    pending_start: AtomicBool,
    ctx: Arc<ServerContext>,
}

impl ServicePort {
    pub fn new(ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(Vec::new()),
            acceptor: Mutex::new(None),
            local_addr: Mutex::new(None),
            pending_start: AtomicBool::new(false),
            ctx,
        })
    }

    /// Register a service. A single-socket service must be alone on its
    /// port, in both directions.
    pub fn add_service(&self, service: Arc<dyn Service>) -> Result<()> {
        let mut services = self.services.write().expect("service list poisoned");
        if services.iter().any(|s| s.is_single_socket()) {
            return Err(TransportError::ServiceRegistration(format!(
                "port is owned by single-socket service '{}'",
                services[0].protocol_name()
            )));
        }
        if service.is_single_socket() && !services.is_empty() {
            return Err(TransportError::ServiceRegistration(format!(
                "single-socket service '{}' cannot share a port",
                service.protocol_name()
            )));
        }
        services.push(service);
        Ok(())
    }

    pub fn is_single_socket(&self) -> bool {
        let services = self.services.read().expect("service list poisoned");
        services.first().is_some_and(|s| s.is_single_socket())
    }

    pub(crate) fn single_socket_service(&self) -> Option<Arc<dyn Service>> {
        let services = self.services.read().expect("service list poisoned");
        services
            .first()
            .filter(|s| s.is_single_socket())
            .cloned()
    }

    pub fn protocol_names(&self) -> String {
        self.services
            .read()
            .expect("service list poisoned")
            .iter()
            .map(|s| s.protocol_name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Linear scan for the first service matching the identifier byte with
    /// a compatible checksum status. `None` closes the connection.
    pub(crate) fn select_service(
        &self,
        checksummed: bool,
        msg: &mut NetworkMessage,
    ) -> Option<Arc<dyn Service>> {
        let protocol_id = msg.get_byte();
        let services = self.services.read().expect("service list poisoned");
        for service in services.iter() {
            if service.protocol_identifier() != protocol_id {
                continue;
            }
            if service.requires_checksum() && !checksummed {
                continue;
            }
            return Some(Arc::clone(service));
        }
        error!(
            protocol_id,
            checksummed, "no service registered for protocol identifier"
        );
        None
    }

    /// Resolve, bind, and start accepting.
    ///
    /// A failure here is a startup error for this listener alone; failures
    /// after a successful open take the backoff-retry path instead.
    #[instrument(skip(self), fields(bind = %self.ctx.config.listener.bind_address))]
    pub async fn open(self: &Arc<Self>, port: u16) -> Result<()> {
        self.close();
        self.pending_start.store(false, Ordering::Release);

        if self.services.read().expect("service list poisoned").is_empty() {
            return Err(TransportError::ServiceRegistration(
                "no services registered on this port".to_string(),
            ));
        }

        let listener_config = &self.ctx.config.listener;
        let resolved = resolve_bind_address(&listener_config.bind_address, port).await?;
        let bind_ip = if listener_config.bind_only_configured_address {
            resolved
        } else {
            match resolved {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }
        };

        let listener = TcpListener::bind((bind_ip, port))
            .await
            .map_err(|source| TransportError::Bind { port, source })?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;
        *self.local_addr.lock().expect("local addr poisoned") = Some(local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.acceptor.lock().expect("acceptor poisoned") = Some(Acceptor { shutdown_tx });

        info!(
            address = %local_addr,
            services = %self.protocol_names(),
            "listener open"
        );
        tokio::spawn(Self::accept_loop(Arc::clone(self), listener, shutdown_rx));
        Ok(())
    }

    /// One accept is always outstanding until shutdown or failure.
    async fn accept_loop(
        port_ref: Arc<ServicePort>,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let port_number = listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_default();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    // deliberate shutdown: no retry
                    debug!(port = port_number, "accept loop stopped");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if port_ref.ctx.config.listener.nodelay {
                            let _ = stream.set_nodelay(true);
                        }
                        if port_ref.ctx.admission.accept_connection(peer.ip()) {
                            Connection::spawn(
                                stream,
                                peer,
                                Arc::clone(&port_ref),
                                Arc::clone(&port_ref.ctx),
                            );
                        } else {
                            debug!(peer = %peer, "connection rejected by admission policy");
                        }
                    }
                    Err(e) => {
                        warn!(
                            port = port_number,
                            error = %e,
                            "accept failed, closing listener and scheduling re-open"
                        );
                        port_ref.close();
                        port_ref.schedule_reopen(port_number);
                        return;
                    }
                }
            }
        }
    }

    /// Arm one backoff-delayed re-open attempt; further failures re-arm.
    fn schedule_reopen(self: &Arc<Self>, port: u16) {
        if self.pending_start.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        let retry = self.ctx.config.listener.bind_retry_interval;
        self.ctx.scheduler.schedule(retry, move || {
            let Some(port_ref) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                if let Err(e) = port_ref.open(port).await {
                    warn!(port, error = %e, "listener re-open failed, retrying");
                    port_ref.schedule_reopen(port);
                }
            });
        });
    }

    /// Stop accepting. Idempotent and safe to call repeatedly; in-flight
    /// connections are left to finish on their own tasks.
    pub fn close(&self) {
        let mut acceptor = self.acceptor.lock().expect("acceptor poisoned");
        if let Some(state) = acceptor.take() {
            let _ = state.shutdown_tx.send(true);
            info!(services = %self.protocol_names(), "listener closed");
        }
    }

    pub(crate) fn on_stop_server(&self) {
        self.close();
    }

    /// Address actually bound, once open has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local addr poisoned")
    }

    pub fn is_open(&self) -> bool {
        self.acceptor.lock().expect("acceptor poisoned").is_some()
    }
}

impl Drop for ServicePort {
    fn drop(&mut self) {
        self.close();
    }
}

/// IPv4 literal, then IPv6 literal, then DNS preferring an IPv6 result and
/// falling back to IPv4.
async fn resolve_bind_address(raw: &str, port: u16) -> Result<IpAddr> {
    if let Ok(v4) = raw.parse::<Ipv4Addr>() {
        return Ok(IpAddr::V4(v4));
    }
    if let Ok(v6) = raw.parse::<Ipv6Addr>() {
        return Ok(IpAddr::V6(v6));
    }

    let resolved: Vec<SocketAddr> = tokio::net::lookup_host((raw, port))
        .await
        .map_err(|_| TransportError::AddressResolution(raw.to_string()))?
        .collect();

    resolved
        .iter()
        .find(|addr| addr.is_ipv6())
        .or_else(|| resolved.iter().find(|addr| addr.is_ipv4()))
        .map(|addr| addr.ip())
        .ok_or_else(|| TransportError::AddressResolution(raw.to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::CoreConfig;
    use crate::connection::ConnectionHandle;
    use crate::service::Protocol;

    struct NullProtocol;

    impl Protocol for NullProtocol {
        fn on_recv_first_message(&mut self, _msg: &mut NetworkMessage) {}
        fn on_recv_message(&mut self, _msg: &mut NetworkMessage) {}
    }

    struct TestService {
        identifier: u8,
        checksummed: bool,
        single: bool,
    }

    impl Service for TestService {
        fn protocol_identifier(&self) -> u8 {
            self.identifier
        }
        fn requires_checksum(&self) -> bool {
            self.checksummed
        }
        fn is_single_socket(&self) -> bool {
            self.single
        }
        fn protocol_name(&self) -> &'static str {
            "test"
        }
        fn make_protocol(&self, _connection: ConnectionHandle) -> Box<dyn Protocol> {
            Box::new(NullProtocol)
        }
    }

    fn service(identifier: u8, checksummed: bool, single: bool) -> Arc<dyn Service> {
        Arc::new(TestService {
            identifier,
            checksummed,
            single,
        })
    }

    #[tokio::test]
    async fn single_socket_service_excludes_others() {
        let ctx = ServerContext::new(CoreConfig::default());
        let port = ServicePort::new(ctx);

        port.add_service(service(0xFF, false, true)).unwrap();
        assert!(port.is_single_socket());
        assert!(port.add_service(service(0x01, true, false)).is_err());

        let other = ServicePort::new(ServerContext::new(CoreConfig::default()));
        other.add_service(service(0x01, true, false)).unwrap();
        assert!(other.add_service(service(0xFF, false, true)).is_err());
        // a second multiplexed service is fine
        other.add_service(service(0x02, false, false)).unwrap();
    }

    #[tokio::test]
    async fn select_service_matches_identifier_and_checksum_status() {
        let ctx = ServerContext::new(CoreConfig::default());
        let port = ServicePort::new(ctx);
        port.add_service(service(0x01, true, false)).unwrap();
        port.add_service(service(0x02, false, false)).unwrap();

        let mut msg = NetworkMessage::from_frame(&[0x01, 0x00, 0x01]).unwrap();
        msg.decode_header();
        assert!(port.select_service(true, &mut msg).is_some());

        // checksummed service never matches a plain message
        let mut msg = NetworkMessage::from_frame(&[0x01, 0x00, 0x01]).unwrap();
        msg.decode_header();
        assert!(port.select_service(false, &mut msg).is_none());

        // plain service matches either status
        for status in [true, false] {
            let mut msg = NetworkMessage::from_frame(&[0x01, 0x00, 0x02]).unwrap();
            msg.decode_header();
            assert!(port.select_service(status, &mut msg).is_some());
        }

        let mut msg = NetworkMessage::from_frame(&[0x01, 0x00, 0x09]).unwrap();
        msg.decode_header();
        assert!(port.select_service(true, &mut msg).is_none());
    }

    #[tokio::test]
    async fn open_requires_a_registered_service() {
        let ctx = ServerContext::new(CoreConfig::default());
        let port = ServicePort::new(ctx);
        assert!(matches!(
            port.open(0).await,
            Err(TransportError::ServiceRegistration(_))
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut config = CoreConfig::default();
        config.listener.bind_address = String::from("127.0.0.1");
        let ctx = ServerContext::new(config);
        let port = ServicePort::new(ctx);
        port.add_service(service(0x01, false, false)).unwrap();

        port.open(0).await.unwrap();
        assert!(port.is_open());

        port.close();
        assert!(!port.is_open());
        port.close();
        assert!(!port.is_open());
    }

    #[tokio::test]
    async fn resolution_prefers_literals() {
        assert_eq!(
            resolve_bind_address("192.168.1.5", 7171).await.unwrap(),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))
        );
        assert_eq!(
            resolve_bind_address("::1", 7171).await.unwrap(),
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        );
        assert!(resolve_bind_address("no.such.host.invalid", 7171)
            .await
            .is_err());
    }
}
