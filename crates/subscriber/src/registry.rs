//! Address to schema lookup for event decoding.

use std::collections::HashMap;
use veritask_ledger::{
    ContractAddresses, ContractSchema, JobProcessor, JobQueue, LedgerResult, MevProtection,
    PaymentEscrow, RawEvent,
};
use veritask_types::{AccountId, BlockRef, DecodedEvent};

type DecodeFn = fn(&AccountId, &BlockRef, &[u8]) -> LedgerResult<DecodedEvent>;

#[derive(Clone, Copy)]
struct Entry {
    name: &'static str,
    decode: DecodeFn,
}

/// Known contracts and the schema decoding each one's events.
#[derive(Clone, Default)]
pub struct ContractRegistry {
    entries: HashMap<AccountId, Entry>,
}

impl ContractRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the deployed contract set.
    pub fn from_addresses(addresses: &ContractAddresses) -> Self {
        let mut registry = Self::new();
        registry.register::<JobQueue>(addresses.job_queue.clone());
        registry.register::<PaymentEscrow>(addresses.payment_escrow.clone());
        registry.register::<JobProcessor>(addresses.job_processor.clone());
        if let Some(mev) = &addresses.mev_protection {
            registry.register::<MevProtection>(mev.clone());
        }
        registry
    }

    /// Decode events from `address` with schema `S`.
    pub fn register<S: ContractSchema>(&mut self, address: AccountId) -> &mut Self {
        self.entries.insert(
            address,
            Entry {
                name: S::NAME,
                decode: S::decode_event,
            },
        );
        self
    }

    /// Registered addresses.
    pub fn addresses(&self) -> Vec<AccountId> {
        self.entries.keys().cloned().collect()
    }

    /// Schema name registered for `address`.
    pub fn schema_name(&self, address: &AccountId) -> Option<&'static str> {
        self.entries.get(address).map(|entry| entry.name)
    }

    /// Number of registered contracts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no contract is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode `event`, or `None` when its contract is not registered.
    pub fn decode(&self, event: &RawEvent) -> Option<LedgerResult<DecodedEvent>> {
        self.entries
            .get(&event.contract)
            .map(|entry| (entry.decode)(&event.contract, &event.block, &event.data))
    }
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (address, entry) in &self.entries {
            map.entry(&address.to_string(), &entry.name);
        }
        map.finish()
    }
}
