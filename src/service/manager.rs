//! # ServiceManager
//!
//! Owns every [`ServicePort`] and coordinates startup and shutdown.
//!
//! `stop()` is idempotent: it posts a stop notification to every port
//! (closing listeners while letting in-flight connections finish) and arms
//! a fixed grace timer; when the timer fires, `die()` hard-stops the
//! manager and the scheduler behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::SHUTDOWN_GRACE;
use crate::context::ServerContext;
use crate::error::{Result, TransportError};
use crate::service::port::ServicePort;
use crate::service::Service;

pub struct ServiceManager {
    ports: Mutex<HashMap<u16, Arc<ServicePort>>>,
    running: AtomicBool,
    dead: AtomicBool,
    death: Notify,
    ctx: Arc<ServerContext>,
}

impl ServiceManager {
    pub fn new(ctx: Arc<ServerContext>) -> Arc<Self> {
        Arc::new(Self {
            ports: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            death: Notify::new(),
            ctx,
        })
    }

    /// Register a service on `port`, creating and opening the listener the
    /// first time the port is seen. A failed open is fatal to this listener
    /// only; sibling ports keep running.
    pub async fn add(self: &Arc<Self>, port: u16, service: Arc<dyn Service>) -> Result<()> {
        if port == 0 {
            return Err(TransportError::ServiceRegistration(format!(
                "service '{}' registered without a port",
                service.protocol_name()
            )));
        }

        let (service_port, created) = {
            let mut ports = self.ports.lock().expect("port map poisoned");
            match ports.get(&port) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let fresh = ServicePort::new(Arc::clone(&self.ctx));
                    ports.insert(port, Arc::clone(&fresh));
                    (fresh, true)
                }
            }
        };

        service_port.add_service(service)?;

        if created {
            if let Err(e) = service_port.open(port).await {
                error!(port, error = %e, "listener failed to start");
                self.ports.lock().expect("port map poisoned").remove(&port);
                return Err(e);
            }
        }
        Ok(())
    }

    /// The port serving `port`, if one is registered.
    pub fn port(&self, port: u16) -> Option<Arc<ServicePort>> {
        self.ports
            .lock()
            .expect("port map poisoned")
            .get(&port)
            .cloned()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drive the manager until `die()`.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            error!("service manager is already running");
            return;
        }
        info!("service manager running");
        while !self.dead.load(Ordering::Acquire) {
            self.death.notified().await;
        }
    }

    /// Begin graceful shutdown. Idempotent; listeners close now, in-flight
    /// connections get the grace period, then `die()` fires.
    pub fn stop(self: &Arc<Self>) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(grace = ?SHUTDOWN_GRACE, "service manager stopping");

        let ports: Vec<Arc<ServicePort>> = {
            let mut map = self.ports.lock().expect("port map poisoned");
            map.drain().map(|(_, port)| port).collect()
        };
        for port in ports {
            self.ctx.scheduler.post(move || port.on_stop_server());
        }

        let manager = Arc::clone(self);
        self.ctx
            .scheduler
            .schedule(SHUTDOWN_GRACE, move || manager.die());
    }

    /// Hard stop: wakes `run()` and shuts the scheduler down. Invoked by
    /// the grace timer, or directly when there is nothing to drain.
    pub fn die(&self) {
        if self.dead.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!("service manager hard stop");
        self.ctx.scheduler.shutdown();
        // notify_one keeps a permit if run() has not parked yet
        self.death.notify_one();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::CoreConfig;
    use crate::connection::ConnectionHandle;
    use crate::message::NetworkMessage;
    use crate::service::Protocol;
    use std::time::Duration;

    struct NullProtocol;

    impl Protocol for NullProtocol {
        fn on_recv_first_message(&mut self, _msg: &mut NetworkMessage) {}
        fn on_recv_message(&mut self, _msg: &mut NetworkMessage) {}
    }

    struct TestService(u8);

    impl Service for TestService {
        fn protocol_identifier(&self) -> u8 {
            self.0
        }
        fn requires_checksum(&self) -> bool {
            false
        }
        fn protocol_name(&self) -> &'static str {
            "test"
        }
        fn make_protocol(&self, _connection: ConnectionHandle) -> Box<dyn Protocol> {
            Box::new(NullProtocol)
        }
    }

    fn local_ctx() -> Arc<ServerContext> {
        let mut config = CoreConfig::default();
        config.listener.bind_address = String::from("127.0.0.1");
        ServerContext::new(config)
    }

    #[tokio::test]
    async fn port_zero_is_rejected() {
        let manager = ServiceManager::new(local_ctx());
        assert!(manager.add(0, Arc::new(TestService(1))).await.is_err());
    }

    #[tokio::test]
    async fn services_share_a_port() {
        let manager = ServiceManager::new(local_ctx());
        manager.add(37191, Arc::new(TestService(1))).await.unwrap();
        manager.add(37191, Arc::new(TestService(2))).await.unwrap();

        let port = manager.port(37191).expect("port registered");
        assert!(port.is_open());
        port.close();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_ports() {
        let manager = ServiceManager::new(local_ctx());
        manager.add(37291, Arc::new(TestService(1))).await.unwrap();
        let port = manager.port(37291).expect("port registered");

        let runner = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.run().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.is_running());

        manager.stop();
        manager.stop();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!port.is_open());
        assert!(!manager.is_running());

        // grace timer has not fired yet; force the hard stop for the test
        manager.die();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run() returns after die()")
            .unwrap();
    }
}
