#![allow(dead_code)]

mod app;
mod factory;

pub use app::{test_config, TestApp};
pub use factory::Factory;
