//! End-to-end tests against an in-memory marketplace.

mod mock_market;
mod pipeline;
