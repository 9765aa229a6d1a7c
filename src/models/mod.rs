//! Core data types shared across the transport stack.

pub mod connect_info;
pub mod controller;

pub use connect_info::{ConnectInfo, Target, VideoCodec, VideoProfile};
pub use controller::{ControllerState, TouchState};
