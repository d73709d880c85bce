//! Shared test fixtures for the extension manager workspace.
//!
//! This crate is a dev-dependency only and never published.
//!
//! # Modules
//!
//! - [`host`]: [`TestHost`] temporary extension trees and [`Harness`] wiring
//! - [`fakes`]: scripted collaborators that record how they were called

pub mod fakes;
pub mod host;

pub use fakes::{
    RecordingRegistrar, RecordingSink, ScriptedInstaller, ScriptedMigrator, StaticPackageIndex,
};
pub use host::{ExtensionFixture, Harness, TestHost};
