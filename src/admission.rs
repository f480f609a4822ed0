//! Connection admission control.
//!
//! Before a freshly accepted socket reaches protocol negotiation its remote
//! address is checked against an [`AdmissionPolicy`]. Rejected addresses are
//! closed immediately, without a diagnostic to the peer.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::RwLock;

/// Collaborator contract consulted on every accept path. Implementations
/// must tolerate concurrent lookups from multiple listeners.
pub trait AdmissionPolicy: Send + Sync {
    fn accept_connection(&self, remote: IpAddr) -> bool;
}

/// Policy that admits everyone; the default when no ban service is wired in.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AdmissionPolicy for AllowAll {
    fn accept_connection(&self, _remote: IpAddr) -> bool {
        true
    }
}

/// Read-mostly ban list keyed by remote address.
#[derive(Debug, Default)]
pub struct BanList {
    banned: RwLock<HashSet<IpAddr>>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&self, addr: IpAddr) {
        self.banned.write().expect("ban list poisoned").insert(addr);
    }

    pub fn unban(&self, addr: IpAddr) -> bool {
        self.banned.write().expect("ban list poisoned").remove(&addr)
    }

    pub fn is_banned(&self, addr: IpAddr) -> bool {
        self.banned.read().expect("ban list poisoned").contains(&addr)
    }
}

impl AdmissionPolicy for BanList {
    fn accept_connection(&self, remote: IpAddr) -> bool {
        !self.is_banned(remote)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn allow_all_admits_everything() {
        let policy = AllowAll;
        assert!(policy.accept_connection(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn banned_address_is_rejected_until_unbanned() {
        let bans = BanList::new();
        let addr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));

        assert!(bans.accept_connection(addr));
        bans.ban(addr);
        assert!(!bans.accept_connection(addr));
        assert!(bans.unban(addr));
        assert!(bans.accept_connection(addr));
        assert!(!bans.unban(addr));
    }

    #[test]
    fn concurrent_lookups_do_not_block_each_other() {
        use std::sync::Arc;

        let bans = Arc::new(BanList::new());
        bans.ban(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let bans = Arc::clone(&bans);
                std::thread::spawn(move || {
                    let addr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, i));
                    bans.accept_connection(addr)
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 7);
    }
}
