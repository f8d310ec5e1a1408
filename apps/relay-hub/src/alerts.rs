use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Process-wide SOS flag toggled over HTTP and pushed to viewers.
#[derive(Clone, Default)]
pub struct SosFlag {
    active: Arc<AtomicBool>,
}

impl SosFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Sets the flag and reports whether the value changed.
    pub fn set(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::AcqRel) != active
    }
}

#[cfg(test)]
mod tests {
    use super::SosFlag;

    #[test_timeout::timeout]
    fn set_reports_changes_only() {
        let flag = SosFlag::new();
        assert!(!flag.is_active());
        assert!(flag.set(true));
        assert!(!flag.set(true));
        assert!(flag.is_active());
        assert!(flag.set(false));
    }
}
