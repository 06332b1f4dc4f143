//! Engine configuration knobs and their defaults.

/// Default operand stack size, in value cells.
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Default threshold for the nearly-equal operator `~=` on floats.
pub const DEFAULT_APPROX_THRESHOLD: f32 = 1e-7;

/// Tunable engine behavior, fixed at startup.
///
/// The parser policies default to the permissive settings: semicolons are
/// accepted everywhere but not required, and single-statement bodies may
/// omit braces.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Operand stack capacity in cells. The first push past this limit is
    /// reported as a stack overflow and halts the VM.
    pub stack_size: usize,
    /// `~=` tolerance for float operands.
    pub approx_threshold: f32,
    /// When true, statements must be terminated with `;`.
    pub require_semicolons: bool,
    /// When true, `if`/`while`/`for` bodies may be a single unbraced statement.
    pub allow_unbraced_blocks: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            approx_threshold: DEFAULT_APPROX_THRESHOLD,
            require_semicolons: false,
            allow_unbraced_blocks: true,
        }
    }
}
