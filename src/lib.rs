#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_ret_no_self)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod object;
pub mod task;

pub use self::object::Signals;
