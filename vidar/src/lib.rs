//! Capture point balance and foothold adaptation for biped walking.
//!
//! Every control tick the [`balance::BalanceController`] runs, in order:
//!
//! 1. [`contact`]: wrench based contact detection per foot.
//! 2. [`foothold`]: partial foothold detection and cropping of the support polygon.
//! 3. [`terrain`] and [`planner`]: footstep constraints and the reference ICP/CMP plan.
//! 4. [`optimization`]: CMP feedback and step adjustment.

pub mod balance;
pub mod config;
pub mod contact;
mod error;
pub mod foothold;
pub mod geometry;
pub mod optimization;
pub mod planner;
pub mod terrain;
pub mod types;

pub use balance::BalanceController;
pub use config::BalanceConfig;
pub use error::{Error, Result};

/// Gravitational acceleration in m/s².
pub const GRAVITY: f64 = 9.81;
