use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot validity token. Once invalidated it stays invalid; owners install
/// a fresh token instead of resetting an old one.
#[derive(Debug)]
pub struct SwitchPoint {
    valid: AtomicBool,
}

impl SwitchPoint {
    pub fn new() -> Self {
        Self {
            valid: AtomicBool::new(true),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

impl Default for SwitchPoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidation_is_permanent() {
        let sp = SwitchPoint::new();
        assert!(sp.is_valid());
        sp.invalidate();
        sp.invalidate();
        assert!(!sp.is_valid());
    }
}
