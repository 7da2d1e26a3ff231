//! Construction-time configuration for the VM.

/// Default size of the call stack arena in bytes.
pub const DEFAULT_STACK_SIZE: usize = 8192;

/// Default limit on nested invokes.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// How `packed-switch` decides whether a value hits the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchBounds {
    /// `first_key <= value < first_key + size`.
    #[default]
    Strict,
    /// `value >= first_key || value < first_key + size`, as older
    /// interpreters computed it. Almost every value passes; one that lands
    /// outside the payload is then a fatal malformed switch.
    Legacy,
}

/// VM configuration. Every VM instance owns its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub stack_size: usize,
    pub switch_bounds: SwitchBounds,
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            switch_bounds: SwitchBounds::Strict,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}
