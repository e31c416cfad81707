// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # stackgen
//!
//! A code generation back-end that turns a strict SSA intermediate language into linear
//! instructions for a stack-based virtual machine with numbered frame slots.
//!
//! ## Features
//!
//! - **Expression-tree recovery** - instructions of a block are merged so intermediate
//!   results stay on the evaluation stack instead of round-tripping through slots
//! - **Slot allocation on the dominator tree** - values with disjoint lifetimes share
//!   slots, and phis whose operands can share one slot disappear without a copy
//! - **Phi elimination** - the remaining phis become stores at the join block and loads
//!   on each incoming edge, splitting critical edges where needed
//! - **Layout and linking** - true successors fall through, jumps are resolved to
//!   absolute offsets and stack depths are computed for every instruction
//! - **Debug locations** - a minimal table telling a debugger where each source variable
//!   lives at every instruction
//!
//! ## Quick Start
//!
//! ```rust
//! use stackgen::prelude::*;
//!
//! let mut mb = ModuleBuilder::new();
//! mb.function("ADDONE", &["x"], |f| {
//!     let x = f.arg(0);
//!     f.block(0, |b| {
//!         let one = b.constant(Constant::Integer(1));
//!         let sum = b.binary(BinaryOp::Add, x, one);
//!         b.ret_val(sum);
//!     });
//! })?;
//! let mut module = mb.finish();
//!
//! let output = ModuleCompiler::new().compile(&mut module)?;
//! assert_eq!(output.code().len(), 4);
//! println!("{output}");
//! # Ok::<(), stackgen::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`il`] - The SSA input: arena module, blocks, phis, builder and verifier
//! - [`analysis`] - Liveness analysis
//! - [`assembly`] - The target instruction set
//! - [`compiler`] - Lowering, allocation, linking, debug locations and the driver
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Every failure of the back-end means the input broke an invariant or used a construct
//! without a translation. Errors abort the compilation of the whole module:
//!
//! ```rust,ignore
//! use stackgen::{compiler::ModuleCompiler, Error};
//!
//! match ModuleCompiler::new().compile(&mut module) {
//!     Ok(output) => println!("{output}"),
//!     Err(Error::NotSupported(what)) => eprintln!("not supported: {what}"),
//!     Err(e) => eprintln!("compiler bug: {e}"),
//! }
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use stackgen::prelude::*;
///
/// let config = CodegenConfig::minimal();
/// let compiler = ModuleCompiler::new().with_config(config);
/// assert!(compiler.events().is_empty());
/// ```
pub mod prelude;

/// The SSA intermediate language.
///
/// Modules are arenas of variables, values, blocks and functions addressed through index
/// handles. Build them with [`il::ModuleBuilder`] and check them with
/// [`il::verify_module`].
pub mod il;

/// Analyses over the IL.
pub mod analysis;

/// The target instruction set of the stack machine.
pub mod assembly;

/// Code generation stages and the [`compiler::ModuleCompiler`] driver.
pub mod compiler;

/// Shared data structures.
pub mod utils;

/// `stackgen` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `stackgen` Error type
///
/// Every stage reports failures through this enum; all of them abort the compilation.
pub use error::Error;
