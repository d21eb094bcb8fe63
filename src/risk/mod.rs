//! Risk management - TP/SL and dynamic grid restarts

pub mod controller;

pub use controller::{RiskController, RiskSignal};
