pub mod client;

pub use client::IgdbClient;
