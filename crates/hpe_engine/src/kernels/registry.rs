//! Typed kernel registry
//!
//! Kernels are registered up front by name; there is no dynamic code loading.

use super::builtin::{Gravity, LinearMotion, Oscillate, Spin};
use super::UpdateKernel;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry slot of a kernel
///
/// Ids are never reused, so ordering by id is ordering by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId(u32);

/// Name-indexed set of kernels
pub struct KernelRegistry {
    kernels: Vec<Arc<dyn UpdateKernel>>,
    by_name: HashMap<String, KernelId>,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl KernelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            kernels: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registry holding the built-in kernels
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(LinearMotion);
        registry.register(Spin);
        registry.register(Gravity);
        registry.register(Oscillate);
        registry
    }

    /// Register a kernel under its name
    ///
    /// Registering a name twice replaces the implementation but keeps the id,
    /// so entities already using it pick up the new kernel.
    pub fn register<K: UpdateKernel + 'static>(&mut self, kernel: K) -> KernelId {
        let name = kernel.name().to_string();
        if let Some(&id) = self.by_name.get(&name) {
            log::info!("Replacing kernel '{}'", name);
            self.kernels[id.0 as usize] = Arc::new(kernel);
            return id;
        }

        let id = KernelId(self.kernels.len() as u32);
        self.kernels.push(Arc::new(kernel));
        self.by_name.insert(name, id);
        log::debug!("Registered kernel '{}' as {:?}", self.kernels[id.0 as usize].name(), id);
        id
    }

    /// Look up a kernel
    pub fn get(&self, id: KernelId) -> Option<&dyn UpdateKernel> {
        self.kernels.get(id.0 as usize).map(|k| k.as_ref())
    }

    /// Shared handle to a kernel, for work sent to other threads
    pub(crate) fn shared(&self, id: KernelId) -> Option<Arc<dyn UpdateKernel>> {
        self.kernels.get(id.0 as usize).cloned()
    }

    /// Id registered under `name`
    pub fn lookup(&self, name: &str) -> Option<KernelId> {
        self.by_name.get(name).copied()
    }

    /// Name of a registered kernel
    pub fn name(&self, id: KernelId) -> Option<&str> {
        self.get(id).map(|k| k.name())
    }

    /// Whether `id` names a registered kernel
    pub fn contains(&self, id: KernelId) -> bool {
        (id.0 as usize) < self.kernels.len()
    }

    /// Number of registered kernels
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{KernelContext, KernelState};

    struct Frozen;

    impl UpdateKernel for Frozen {
        fn name(&self) -> &str {
            "spin"
        }

        fn evaluate_scalar(&self, state: &KernelState, _ctx: &KernelContext) -> KernelState {
            *state
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = KernelRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        for name in ["linear_motion", "spin", "gravity", "oscillate"] {
            let id = registry.lookup(name).unwrap();
            assert_eq!(registry.name(id), Some(name));
        }
        assert!(registry.lookup("teleport").is_none());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = KernelRegistry::with_builtins();
        let spin = registry.lookup("spin").unwrap();
        assert_eq!(registry.register(Frozen), spin);
        assert_eq!(registry.len(), 4);

        let mut state = KernelState::default();
        state.angular_velocity.y = 1.0;
        let kernel = registry.get(spin).unwrap();
        assert_eq!(kernel.evaluate_scalar(&state, &KernelContext::new(1.0, 1)), state);
    }
}
