//! # Duel Network
//!
//! TCP request/response transport for the Duel service tiers.
//!
//! - [`MessageFrame`]: `u32` big-endian length prefix plus a bincode payload
//! - [`RpcServer`]: serves any [`RpcService`], answering `Ping` for liveness
//! - [`TcpChannel`]: lazily dialed channel to one leader address
//! - [`PersistenceClient`] / [`GameClient`]: typed clients implementing the
//!   service traits, built by [`PersistenceConnector`] / [`GameConnector`]
//!
//! ```rust,no_run
//! use duel_core::{LeaderAddress, PersistenceApi};
//! use duel_network::{PersistenceClient, TcpChannel, TcpRpcConfig};
//!
//! # async fn example() -> duel_core::DuelResult<()> {
//! let channel = TcpChannel::new(
//!     LeaderAddress::new("tcp://127.0.0.1:50052"),
//!     TcpRpcConfig::default(),
//! );
//! PersistenceClient::new(channel).ping().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod frame;
pub mod protocol;
pub mod server;

pub use channel::TcpChannel;
pub use client::{GameClient, GameConnector, PersistenceClient, PersistenceConnector};
pub use config::TcpRpcConfig;
pub use frame::MessageFrame;
pub use protocol::{
    GameHandler, GameRequest, GameResponse, PersistenceHandler, PersistenceRequest,
    PersistenceResponse, RpcService,
};
pub use server::{RpcServer, RpcServerHandle};
