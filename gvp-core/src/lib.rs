#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod entities;
pub mod events;
pub mod health;
pub mod ledger;
pub mod processors;
pub mod utils;
