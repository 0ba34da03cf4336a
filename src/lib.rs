#![cfg_attr(docsrs, feature(doc_cfg))]
//! # zevabms_lib
//!
//! Decoder and state aggregator for the CAN bus protocol spoken by ZEVA
//! BMS12/BMS24 battery management modules. Up to 16 units live on one bus;
//! each reports up to 12 cell voltages and 2 temperatures in reply to a poll.
//!
//! The core is transport-agnostic: raw [`protocol::Frame`] values go in,
//! typed [`protocol::ProtocolMessage`] values come out of [`protocol::decode`],
//! and a [`monitor::BusAggregator`] folds them into per-unit snapshots. The
//! optional SocketCAN client wires the two to a real interface.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling
//!   the `zevabms` command-line tool and pulls in `socketcan` and `serde`.
//!
//! ### Client Features
//! - `socketcan`: Enables the blocking SocketCAN transport client (Linux only).
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for serializing/deserializing snapshots
//!   and protocol messages.
//! - `bin-dependencies`: Enables all features required by the `zevabms`
//!   binary executable.

/// Contains error types for the library.
mod error;
/// Per-unit state tracking and scan-cycle aggregation.
pub mod monitor;
/// Frame/identifier layout, message decoding and request encoding.
pub mod protocol;

pub use error::{DecodeError, Error};

/// Blocking SocketCAN transport client.
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
#[cfg(feature = "socketcan")]
pub mod socketcan;
