#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod cstr;
pub mod error;
pub mod identity;
pub mod portal;
pub mod provisioning;
pub mod reset_intent;
pub mod scheduler;
pub mod sensors;
pub mod storage;
pub mod telemetry;

#[cfg(feature = "esp32")]
pub mod mqtt;
#[cfg(feature = "esp32")]
pub mod portal_server;
#[cfg(feature = "esp32")]
pub mod rtc_marker;
#[cfg(feature = "esp32")]
pub mod transport;
#[cfg(feature = "esp32")]
pub mod wifi;

#[cfg(test)]
mod testing;
