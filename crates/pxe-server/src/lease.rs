//! In-memory DHCP lease bookkeeping.
//!
//! Leases never expire and are not persisted; a restart forgets them.

use crate::error::{PxeError, Result};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, PoisonError, RwLock};

#[derive(Debug, Default)]
struct Leases {
    mac_to_ip: HashMap<String, Ipv4Addr>,
    ip_to_mac: HashMap<Ipv4Addr, String>,
}

/// Last address offered to each MAC, with a reverse index.
///
/// Callers pass MACs already normalized.
#[derive(Debug, Default)]
pub struct LeaseStore {
    leases: RwLock<Leases>,
}

impl LeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `ip` for `mac`, replacing the MAC's previous address.
    pub fn set(&self, mac: &str, ip: Ipv4Addr) {
        let mut leases = self.leases.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = leases.mac_to_ip.insert(mac.to_string(), ip) {
            if previous != ip {
                leases.ip_to_mac.remove(&previous);
            }
        }
        if let Some(displaced) = leases.ip_to_mac.insert(ip, mac.to_string()) {
            if displaced != mac {
                leases.mac_to_ip.remove(&displaced);
            }
        }
    }

    pub fn get(&self, mac: &str) -> Option<Ipv4Addr> {
        let leases = self.leases.read().unwrap_or_else(PoisonError::into_inner);
        leases.mac_to_ip.get(mac).copied()
    }

    /// Whether any MAC currently holds `ip`
    pub fn in_use(&self, ip: Ipv4Addr) -> bool {
        let leases = self.leases.read().unwrap_or_else(PoisonError::into_inner);
        leases.ip_to_mac.contains_key(&ip)
    }

    /// MAC currently holding `ip`
    pub fn mac_for_ip(&self, ip: Ipv4Addr) -> Option<String> {
        let leases = self.leases.read().unwrap_or_else(PoisonError::into_inner);
        leases.ip_to_mac.get(&ip).cloned()
    }

    pub fn len(&self) -> usize {
        let leases = self.leases.read().unwrap_or_else(PoisonError::into_inner);
        leases.mac_to_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inclusive IPv4 range handing out addresses round-robin.
#[derive(Debug)]
pub struct AddressPool {
    start: u32,
    end: u32,
    cursor: Mutex<u32>,
}

impl AddressPool {
    /// Create a pool over `start..=end`.
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self> {
        let (start, end) = (u32::from(start), u32::from(end));
        if start > end {
            return Err(PxeError::Configuration(format!(
                "DHCP range start {} is after end {}",
                Ipv4Addr::from(start),
                Ipv4Addr::from(end)
            )));
        }
        Ok(Self {
            start,
            end,
            cursor: Mutex::new(start),
        })
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (self.start..=self.end).contains(&u32::from(ip))
    }

    /// Hand `mac` the next address not held in `leases` and record the
    /// lease, continuing after the last address handed out and wrapping at
    /// the end of the range. The pick and the record happen under the pool
    /// lock, so concurrent requests never receive the same address.
    pub fn allocate_for(&self, mac: &str, leases: &LeaseStore) -> Option<Ipv4Addr> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ip) = leases.get(mac).filter(|ip| self.contains(*ip)) {
            return Some(ip);
        }

        let size = u64::from(self.end - self.start) + 1;
        let mut candidate = *cursor;
        for _ in 0..size {
            let ip = Ipv4Addr::from(candidate);
            candidate = if candidate >= self.end {
                self.start
            } else {
                candidate + 1
            };
            if !leases.in_use(ip) {
                leases.set(mac, ip);
                *cursor = candidate;
                return Some(ip);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_A: &str = "aa:bb:cc:dd:ee:01";
    const MAC_B: &str = "aa:bb:cc:dd:ee:02";

    #[test]
    fn test_set_replaces_previous_address() {
        let leases = LeaseStore::new();
        leases.set(MAC_A, Ipv4Addr::new(10, 0, 0, 10));
        leases.set(MAC_A, Ipv4Addr::new(10, 0, 0, 11));

        assert_eq!(leases.get(MAC_A), Some(Ipv4Addr::new(10, 0, 0, 11)));
        assert!(!leases.in_use(Ipv4Addr::new(10, 0, 0, 10)));
        assert_eq!(leases.mac_for_ip(Ipv4Addr::new(10, 0, 0, 11)).as_deref(), Some(MAC_A));
        assert_eq!(leases.len(), 1);
    }

    #[test]
    fn test_set_moves_address_between_macs() {
        let leases = LeaseStore::new();
        let ip = Ipv4Addr::new(10, 0, 0, 10);
        leases.set(MAC_A, ip);
        leases.set(MAC_B, ip);

        assert_eq!(leases.get(MAC_A), None);
        assert_eq!(leases.mac_for_ip(ip).as_deref(), Some(MAC_B));
        assert_eq!(leases.get("aa:bb:cc:dd:ee:03"), None);
    }

    #[test]
    fn test_pool_skips_leased_and_wraps() {
        let pool = AddressPool::new(Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 12)).unwrap();
        let leases = LeaseStore::new();
        leases.set(MAC_A, Ipv4Addr::new(10, 0, 0, 11));

        assert_eq!(pool.allocate_for(MAC_B, &leases), Some(Ipv4Addr::new(10, 0, 0, 10)));
        assert_eq!(leases.get(MAC_B), Some(Ipv4Addr::new(10, 0, 0, 10)));
        // Asking again returns the recorded lease
        assert_eq!(pool.allocate_for(MAC_B, &leases), Some(Ipv4Addr::new(10, 0, 0, 10)));

        assert_eq!(pool.allocate_for("aa:bb:cc:dd:ee:03", &leases), Some(Ipv4Addr::new(10, 0, 0, 12)));
        assert_eq!(pool.allocate_for("aa:bb:cc:dd:ee:04", &leases), None);
    }

    #[test]
    fn test_concurrent_allocation_never_shares_an_address() {
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        for _ in 0..50 {
            let pool = AddressPool::new(ip, ip).unwrap();
            let leases = LeaseStore::new();
            let barrier = std::sync::Barrier::new(2);

            let (a, b) = std::thread::scope(|scope| {
                let first = scope.spawn(|| {
                    barrier.wait();
                    pool.allocate_for(MAC_A, &leases)
                });
                let second = scope.spawn(|| {
                    barrier.wait();
                    pool.allocate_for(MAC_B, &leases)
                });
                (first.join().unwrap(), second.join().unwrap())
            });

            assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
            assert_eq!(leases.len(), 1);
        }
    }

    #[test]
    fn test_pool_range_checks() {
        assert!(AddressPool::new(Ipv4Addr::new(10, 0, 0, 20), Ipv4Addr::new(10, 0, 0, 10)).is_err());
        let pool = AddressPool::new(Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 20)).unwrap();
        assert!(pool.contains(Ipv4Addr::new(10, 0, 0, 15)));
        assert!(!pool.contains(Ipv4Addr::new(10, 0, 0, 21)));

        let single = AddressPool::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 5)).unwrap();
        assert_eq!(single.allocate_for(MAC_A, &LeaseStore::new()), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }
}
