pub mod alias;
pub mod deployment;
pub mod domain;
pub mod project;

pub mod prelude;

pub use prelude::*;
