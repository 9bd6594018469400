//! Integration tests for the AVIATOR engine and service.

mod round_lifecycle;
mod service;
mod simulation;
