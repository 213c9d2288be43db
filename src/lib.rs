//! ami-manager - AMI replication and retirement across regions and accounts
//!
//! This crate copies a source AMI to a set of target regions, shares it with
//! other accounts via launch permissions, propagates the source tags into each
//! account's view of the image, and prunes old image generations together with
//! their backing snapshots.

pub mod aws;
pub mod cleanup;
pub mod image;
pub mod orchestrator;
pub mod reaper;
pub mod wait;

#[cfg(test)]
pub(crate) mod testing;
