use crate::error::IdentityError;
use pnet::util::MacAddr;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng, TryRngCore};
use std::fmt;
use std::sync::Mutex;

/// The hardware address and transaction id one simulated client uses for a
/// single DISCOVER/REQUEST exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIdentity {
    pub hardware_address: MacAddr,
    pub transaction_id: u32,
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} xid={:#010x}", self.hardware_address, self.transaction_id)
    }
}

/// Hands out fresh client identities.
///
/// Hardware addresses come straight from the OS random source, transaction ids
/// from a general purpose generator seeded once when the generator is built.
pub struct IdentityGenerator {
    xids: Mutex<StdRng>,
}

impl IdentityGenerator {
    pub fn new() -> Result<Self, IdentityError> {
        let rng = StdRng::try_from_os_rng()
            .map_err(|e| IdentityError::RandomSource(e.to_string()))?;
        Ok(Self {
            xids: Mutex::new(rng),
        })
    }

    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            xids: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn next_identity(&self) -> Result<ClientIdentity, IdentityError> {
        Ok(ClientIdentity {
            hardware_address: random_mac()?,
            transaction_id: self.next_xid(),
        })
    }

    fn next_xid(&self) -> u32 {
        let mut rng = self.xids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random()
    }
}

pub fn random_mac() -> Result<MacAddr, IdentityError> {
    let mut mac = [0u8; 6];
    OsRng
        .try_fill_bytes(&mut mac)
        .map_err(|e| IdentityError::RandomSource(e.to_string()))?;
    Ok(local_unicast(mac))
}

/// Forces the locally administered bit and clears the multicast bit.
pub fn local_unicast(mut mac: [u8; 6]) -> MacAddr {
    mac[0] |= 0x02;
    mac[0] &= 0xfe;
    MacAddr::new(mac[0], mac[1], mac[2], mac[3], mac[4], mac[5])
}
