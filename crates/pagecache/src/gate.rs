//! One-shot coordination of restore completion and surface readiness
//!
//! Restore and view creation race each other. The gate holds two
//! single-assignment inputs and releases the restored value exactly once,
//! when both are set. After `close` it swallows everything.

/// Fires once both the restore outcome and the surface are ready
#[derive(Debug)]
pub struct ReplayGate<T> {
    outcome: Option<T>,
    resolved: bool,
    surface_ready: bool,
    fired: bool,
    closed: bool,
}

impl<T> Default for ReplayGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReplayGate<T> {
    /// Create an open gate with neither input set
    pub fn new() -> Self {
        Self {
            outcome: None,
            resolved: false,
            surface_ready: false,
            fired: false,
            closed: false,
        }
    }

    /// Set the restore outcome; returns it if the surface is already ready
    ///
    /// Only the first call counts.
    pub fn resolve(&mut self, outcome: T) -> Option<T> {
        if self.closed || self.resolved {
            return None;
        }
        self.resolved = true;
        self.outcome = Some(outcome);
        self.try_fire()
    }

    /// Mark the surface ready; returns the outcome if it was waiting
    pub fn surface_ready(&mut self) -> Option<T> {
        if self.closed || self.surface_ready {
            return None;
        }
        self.surface_ready = true;
        self.try_fire()
    }

    /// Disarm the gate, dropping any held outcome
    pub fn close(&mut self) {
        self.closed = true;
        self.outcome = None;
    }

    /// Whether the outcome has been released
    pub fn is_fired(&self) -> bool {
        self.fired
    }

    /// Whether a restore outcome has been set
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Whether the gate was closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn try_fire(&mut self) -> Option<T> {
        if self.fired || !self.resolved || !self.surface_ready {
            return None;
        }
        self.fired = true;
        self.outcome.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_first() {
        let mut gate = ReplayGate::new();

        assert_eq!(gate.resolve(7), None);
        assert!(!gate.is_fired());
        assert_eq!(gate.surface_ready(), Some(7));
        assert!(gate.is_fired());
    }

    #[test]
    fn test_surface_first() {
        let mut gate = ReplayGate::new();

        assert_eq!(gate.surface_ready(), None);
        assert_eq!(gate.resolve("state"), Some("state"));
    }

    #[test]
    fn test_fires_once() {
        let mut gate = ReplayGate::new();

        gate.surface_ready();
        assert_eq!(gate.resolve(1), Some(1));
        assert_eq!(gate.resolve(2), None);
        assert_eq!(gate.surface_ready(), None);
    }

    #[test]
    fn test_first_resolve_wins() {
        let mut gate = ReplayGate::new();

        gate.resolve(1);
        gate.resolve(2);
        assert_eq!(gate.surface_ready(), Some(1));
    }

    #[test]
    fn test_closed_gate_is_inert() {
        let mut gate = ReplayGate::new();

        gate.resolve(1);
        gate.close();
        assert_eq!(gate.surface_ready(), None);
        assert!(!gate.is_fired());

        let mut gate = ReplayGate::new();
        gate.close();
        assert_eq!(gate.surface_ready(), None);
        assert_eq!(gate.resolve(1), None);
        assert!(gate.is_closed());
    }
}
