//! Rhai-backed math channels
//!
//! This module compiles user formulas into derived channels evaluated once
//! per sample tick. A formula mixes live channel values with slider-driven
//! parameters:
//!
//! - `a`..`m` - parameters, each bound to a slider (default position 2)
//! - `x0`, `y0` - the X and Y axis channels
//! - `z0`..`z9` - the auxiliary channels
//!
//! ## Functions
//!
//! `sin`, `cos`, `tan`, `asin`, `acos`, `atan`, `atan2`, `sinh`, `cosh`,
//! `tanh`, `sqrt`, `exp`, `log` (natural), `log10`, `log2`, `abs`, `floor`,
//! `ceil`, `round`, `min`, `max`, `pow`, `clamp`.
//!
//! `^` raises to a power. All arithmetic is floating point.
//!
//! ## Example Formulas
//!
//! Scaled X channel:
//! ```text
//! a * x0
//! ```
//!
//! Magnitude of the X/Y pair:
//! ```text
//! sqrt(x0^2 + y0^2)
//! ```
//!
//! Offset-corrected auxiliary channel:
//! ```text
//! (z1 - b) * c
//! ```
//!
//! A channel that no enabled input feeds reads as NaN, and so does the
//! result of any formula that reads it.

mod engine;
pub mod tokenizer;

pub use engine::{CompiledExpression, ExpressionEngine, ParameterBinding, SliderRange};
pub use tokenizer::{tokenize, Token};
