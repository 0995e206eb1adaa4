pub mod entity;
pub mod fiber;
pub mod files;
pub mod foreign;
mod intrinsics;
pub mod ops;
pub mod render;
pub mod runtime;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;


pub use fiber::{Fiber, Scheduler};
pub use foreign::{ForeignError, ForeignFn, ForeignRegistry, ForeignResult};
pub use intrinsics::{noise_2d, str_value};
pub use render::{RenderCategory, RenderItem, RenderQueues};
pub use runtime::{GameRuntime, RayHit};
pub use value::Value;
pub use vm::{EventHandler, STACK_MAX, VM};
