//! Minimal stand-in for the original `increaseTransferBytes` accounting
//! hook. Full metrics aggregation/export is an external collaborator (see
//! spec §1); this is just the counter the core is expected to drive.

use std::sync::atomic::{AtomicU64, Ordering};

static TRANSFER_BYTES: AtomicU64 = AtomicU64::new(0);

pub fn increase_transfer_bytes(n: u64) {
    TRANSFER_BYTES.fetch_add(n, Ordering::Relaxed);
}

pub fn snapshot() -> u64 {
    TRANSFER_BYTES.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_calls() {
        let before = snapshot();
        increase_transfer_bytes(10);
        increase_transfer_bytes(5);
        assert_eq!(snapshot() - before, 15);
    }
}
