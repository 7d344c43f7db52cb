use std::sync::RwLock;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::types::{Credential, Region};

pub const DEVICE_POOL_SIZE: usize = 10;

/// Cache key for one upstream session: which region, which account, which device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub region: Region,
    pub account_slot: usize,
    pub device_slot: usize,
}

/// Account credentials and virtual device fingerprints shared by every
/// upstream session. Slot lookups never fail: indexes wrap around the pool.
pub struct IdentityPool {
    accounts: RwLock<Vec<Credential>>,
    devices: Vec<String>,
}

impl IdentityPool {
    pub fn new(accounts: Vec<Credential>, devices: Vec<String>) -> Self {
        let devices = if devices.is_empty() {
            generate_devices(DEVICE_POOL_SIZE)
        } else {
            devices
        };
        Self {
            accounts: RwLock::new(usable_accounts(accounts)),
            devices,
        }
    }

    /// Replaces the account list, e.g. after the user edits credentials.
    pub fn set_accounts(&self, accounts: Vec<Credential>) {
        let mut guard = self.accounts.write().unwrap_or_else(|p| p.into_inner());
        *guard = usable_accounts(accounts);
    }

    pub fn valid_account_count(&self) -> usize {
        self.accounts.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn account_for_slot(&self, slot: usize) -> Credential {
        let accounts = self.accounts.read().unwrap_or_else(|p| p.into_inner());
        accounts[slot % accounts.len()].clone()
    }

    pub fn device_for_slot(&self, slot: usize) -> &str {
        &self.devices[slot % self.devices.len()]
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Builds a cache key with both slots already wrapped into range, so that
    /// `slot` and `slot + pool_size` share one session.
    pub fn identity_key(&self, region: Region, account_slot: usize, device_slot: usize) -> IdentityKey {
        IdentityKey {
            region,
            account_slot: account_slot % self.valid_account_count(),
            device_slot: device_slot % self.device_count(),
        }
    }
}

/// Drops half-filled entries and falls back to a single anonymous identity.
fn usable_accounts(accounts: Vec<Credential>) -> Vec<Credential> {
    let mut usable: Vec<Credential> = accounts.into_iter().filter(Credential::is_complete).collect();
    if usable.is_empty() {
        usable.push(Credential::anonymous());
    }
    usable
}

pub fn generate_devices(count: usize) -> Vec<String> {
    (0..count).map(|_| Uuid::new_v4().to_string()).collect()
}

/// Restart-stable slot for a channel: the first eight bytes of the SHA-256
/// digest of its id, reduced modulo `pool_size`.
pub fn pin(channel_id: &str, pool_size: usize) -> usize {
    if pool_size == 0 {
        return 0;
    }
    let digest = Sha256::digest(channel_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % pool_size as u64) as usize
}
