//! Engine Boundary Interfaces Library
//!
//! This crate provides the boundary between the scheduling engine and its
//! external collaborators: the lock-free message queues, the packet
//! transport and the MAC layer, together with simulated implementations of
//! both collaborators.

pub mod mac;
pub mod queues;
pub mod txrx;

use common::CommonError;
use thiserror::Error;

pub use mac::{MacEndpoint, MacStats, SimMac, SimMacConfig};
pub use queues::{EventQueue, MessageQueues};
pub use txrx::{PacketTxRx, SimRadioConfig, SimTxRx, TxRxStats};

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}
