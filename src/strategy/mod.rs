//! Valuation strategy: archetype classification and extraction value.

pub mod classify;
pub mod valuation;
