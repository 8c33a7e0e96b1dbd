#![allow(dead_code)]
#![allow(unused_variables)]
#![allow(unused_imports)]

pub mod error;
pub mod log;
pub mod util;
pub mod settings;
pub mod elf;
pub mod procfs;
pub mod layout;
pub mod value;
pub mod render;
pub mod pretty;
pub mod stack;
pub mod commands;

#[cfg(test)]
mod testimage;
