//! Test fixtures for tour-planner.
//!
//! Provides realistic test data including:
//! - Dresden-area locations around the depot
//! - Builders for stop lists and grids

#![allow(dead_code)]

pub mod dresden_locations;

pub use dresden_locations::*;
