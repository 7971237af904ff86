#![deny(warnings)]

pub mod camera;
pub mod config;
pub mod dialogue;
pub mod emotion;
pub mod perception;
pub mod session;
pub mod speech;
pub mod util;
