pub mod atomic;
pub mod exec;
pub mod sparse;
pub mod timing;
