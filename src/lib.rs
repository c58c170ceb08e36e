#[cfg(feature = "cli")]
pub mod config;
pub mod duration;
pub mod middleware;
pub mod quickpulse;
pub mod sampling;
pub mod timer;
pub mod types;

#[cfg(feature = "cadence-adapter")]
pub mod cadence;

#[cfg(test)]
pub mod testutils;
