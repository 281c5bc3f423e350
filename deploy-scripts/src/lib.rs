//! Scripts for deploying and upgrading the PayLink contract behind a
//! transparent upgradeable proxy.
//!
//! The [`orchestrator`] decides what a run has to do by comparing compiled
//! artifacts against the deployment [`ledger`], and drives the chain through
//! the [`chain::ChainClient`] capability.

pub mod artifact;
pub mod calldata;
pub mod chain;
pub mod cli;
mod commands;
pub mod config;
pub mod confirmations;
pub mod constants;
pub mod errors;
pub mod ledger;
pub mod networks;
pub mod operations;
pub mod orchestrator;
pub mod report;
mod solidity;
pub mod tasks;
