use thiserror::Error;

use crate::il::{BlockId, ValueId};

/// Builds an [`Error::InvariantViolation`] carrying the source location of the check.
///
/// ```rust,ignore
/// return Err(invariant_error!("value {} has no slot", value));
/// ```
macro_rules! invariant_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvariantViolation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvariantViolation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The error type for every stage of the back-end.
///
/// None of these are user diagnostics. Each variant means an upstream pass handed over an IL
/// module that breaks an invariant this crate relies on, or asked for a construct the lowering
/// does not implement. Callers should treat any of them as a compiler bug and abort the
/// compilation.
///
/// # Error Categories
///
/// ## Internal invariant violations
/// - [`Error::InvariantViolation`] - generic broken invariant, with the location of the check
/// - [`Error::CircularDependency`] - fragment graph of a block cannot be scheduled
/// - [`Error::StrictnessViolation`] - a use is not dominated by its definition
/// - [`Error::GlobalExclusivity`] - two versions of one global are live at the same point
///
/// ## Unsupported constructs
/// - [`Error::NotSupported`] - an IL shape the lowering has no translation for
///
/// # Examples
///
/// ```rust,ignore
/// use stackgen::{Error, compiler::ModuleCompiler};
///
/// match ModuleCompiler::new().compile(&mut module) {
///     Ok(output) => println!("{output}"),
///     Err(Error::CircularDependency(block)) => eprintln!("cannot schedule {block}"),
///     Err(e) => eprintln!("compiler bug: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An internal invariant does not hold.
    ///
    /// The file and line point at the check that failed, not at the IL construct.
    #[error("Invariant violation - {file}:{line}: {message}")]
    InvariantViolation {
        /// Description of the violated invariant
        message: String,
        /// Source file of the failed check
        file: &'static str,
        /// Source line of the failed check
        line: u32,
    },

    /// The fragment dependency graph of a block contains a cycle.
    ///
    /// Cannot happen for strict SSA input.
    #[error("Circular dependency between instructions of block {0}")]
    CircularDependency(BlockId),

    /// A value is used in a block its definition does not dominate.
    #[error("Value {value} used in block {block} without a dominating definition")]
    StrictnessViolation {
        /// The offending value
        value: ValueId,
        /// The block containing the use
        block: BlockId,
    },

    /// Two versions of the same global variable are live at one program point.
    #[error("Two versions of global '{variable}' are live at block {block}")]
    GlobalExclusivity {
        /// Name of the global variable
        variable: String,
        /// The block where the overlap was found
        block: BlockId,
    },

    /// The lowering has no translation for this construct.
    #[error("Not supported - {0}")]
    NotSupported(String),
}
