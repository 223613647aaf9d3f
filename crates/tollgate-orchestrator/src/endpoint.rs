//! Rating module command state
//!
//! The RPC surface that receives reload/enable/disable commands is an
//! external collaborator; this is the process-wide state it mutates. The
//! orchestrator drains it at the top of each cycle with read-then-clear
//! semantics, so every command is applied exactly once.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Pending rating-module commands, drained by the orchestrator
#[derive(Debug, Default)]
pub struct RatingCommandState {
    global_reload: Mutex<bool>,
    pending_reload: Mutex<Vec<String>>,
    module_state: Mutex<HashMap<String, bool>>,
}

impl RatingCommandState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a reload of every rating module
    pub fn reload_all(&self) {
        *self.global_reload.lock() = true;
    }

    /// Request a reload of one module
    pub fn reload_module(&self, name: &str) {
        let mut pending = self.pending_reload.lock();
        if !pending.iter().any(|n| n == name) {
            pending.push(name.to_string());
        }
    }

    pub fn enable_module(&self, name: &str) {
        self.module_state.lock().insert(name.to_string(), true);
    }

    /// Disable a module; a pending reload for it is dropped as moot
    pub fn disable_module(&self, name: &str) {
        self.module_state.lock().insert(name.to_string(), false);
        self.pending_reload.lock().retain(|n| n != name);
    }

    /// Take the pending reload list, leaving it empty
    pub fn drain_reload_list(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending_reload.lock())
    }

    /// Take the pending enable/disable map, leaving it empty
    pub fn drain_module_state(&self) -> HashMap<String, bool> {
        std::mem::take(&mut *self.module_state.lock())
    }

    /// Take the global-reload flag, resetting it
    pub fn take_global_reload(&self) -> bool {
        std::mem::replace(&mut *self.global_reload.lock(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_clears_reload_list() {
        let state = RatingCommandState::new();
        state.reload_module("flat");
        state.reload_module("noop");
        state.reload_module("flat"); // duplicate ignored

        assert_eq!(state.drain_reload_list(), vec!["flat", "noop"]);
        assert!(state.drain_reload_list().is_empty());
    }

    #[test]
    fn test_drain_clears_module_state() {
        let state = RatingCommandState::new();
        state.enable_module("flat");
        state.disable_module("noop");

        let drained = state.drain_module_state();
        assert_eq!(drained.get("flat"), Some(&true));
        assert_eq!(drained.get("noop"), Some(&false));
        assert!(state.drain_module_state().is_empty());
    }

    #[test]
    fn test_disable_drops_pending_reload() {
        let state = RatingCommandState::new();
        state.reload_module("flat");
        state.disable_module("flat");
        assert!(state.drain_reload_list().is_empty());
    }

    #[test]
    fn test_global_reload_flag_resets() {
        let state = RatingCommandState::new();
        assert!(!state.take_global_reload());
        state.reload_all();
        assert!(state.take_global_reload());
        assert!(!state.take_global_reload());
    }
}
