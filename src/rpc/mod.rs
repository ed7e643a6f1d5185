//! RPC bridge: broker client, JSON-RPC request dispatcher, and periodic
//! broadcaster (spec §4.8-§4.10).

pub mod broadcaster;
pub mod client;
pub mod dispatcher;

pub use broadcaster::PeriodicBroadcaster;
pub use client::RpcClient;
pub use dispatcher::RpcDispatcher;
