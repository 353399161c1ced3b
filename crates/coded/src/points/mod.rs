//! Built-in extension points.

mod diffusivity;
mod function1;

pub use diffusivity::{CodedDiffusivity, Diffusivity};
pub use function1::{CodedFunction1, Function1};
