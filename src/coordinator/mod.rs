// ABOUTME: Coordinator module for keyed request de-duplication and queueing.
// ABOUTME: Contains the request coordinator and a cancellable status poller.

mod coordinator;
mod poller;

pub use coordinator::{DEFAULT_MAX_CONCURRENT, RequestCoordinator};
pub use poller::Poller;

#[cfg(test)]
mod poller_test;
