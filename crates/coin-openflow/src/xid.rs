use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_XID: AtomicU32 = AtomicU32::new(1);

/// Returns a fresh transaction id.
///
/// Ids come from one process-wide counter that wraps at 32 bits.
pub fn next_xid() -> u32 {
    NEXT_XID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xids_increase() {
        let a = next_xid();
        let b = next_xid();
        assert_ne!(a, b);
        assert!(b.wrapping_sub(a) >= 1);
    }

    #[test]
    fn test_counter_wraps() {
        let counter = AtomicU32::new(u32::MAX);
        assert_eq!(counter.fetch_add(1, Ordering::Relaxed), u32::MAX);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
