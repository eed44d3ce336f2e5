#![deny(warnings, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod api;
pub mod app;
pub mod clients;
pub mod config;
pub mod diff;
pub mod monitor;
pub mod noise;
pub mod notify;
pub mod observability;
pub mod queue;
pub mod scheduler;
pub mod severity;
pub mod store;
pub mod summary;
pub mod util;
