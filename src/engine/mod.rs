//! Core engine: the detect → evaluate → decide → act loop and its parts.

pub mod detector;
pub mod poller;
pub mod gate;
pub mod sniper;
