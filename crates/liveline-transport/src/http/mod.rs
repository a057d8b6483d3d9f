pub mod client;

pub use client::{HttpLiveApi, HttpLiveApiBuilder};
