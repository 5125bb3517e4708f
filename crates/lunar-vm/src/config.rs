//! Runtime configuration types.

/// Limits applied by a [`LuaState`](crate::LuaState).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum number of nested calls before `stack overflow` is raised.
    pub max_call_depth: usize,
    /// Extra stack slots reserved above each frame's registers.
    pub stack_headroom: usize,
    /// Maximum length of an `__index`/`__newindex`/`__call` chain.
    pub max_meta_chain: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            stack_headroom: 20,
            max_meta_chain: 2000,
        }
    }
}

impl VmConfig {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}
