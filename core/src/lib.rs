pub mod expr;
pub mod handle;
pub mod sketch;
