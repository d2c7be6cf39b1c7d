//! Virtual machine call sites and shared runtime handle

mod runtime;
mod shared;

pub use runtime::Runtime;
pub use shared::SharedRuntime;
