// ABOUTME: Root module for flightdeck - async request coordination primitives.
// ABOUTME: Re-exports all public types from submodules.

pub mod coordinator;
pub mod error;

pub use coordinator::{DEFAULT_MAX_CONCURRENT, Poller, RequestCoordinator};
pub use error::{FlightdeckError, PollError, SubmitError};
