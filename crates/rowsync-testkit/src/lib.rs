//! # rowsync testkit
//!
//! Testing utilities for rowsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: exact wire bytes for small changesets and patchsets
//! - **Generators**: Proptest strategies for change logs and write scripts
//! - **Fixtures**: a source/target database pair with a shared schema
//!
//! ## Golden Vectors
//!
//! ```rust
//! use rowsync_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, hex) in verify_all_vectors() {
//!     assert!(matches, "{}: {}", name, hex);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use rowsync_testkit::generators::{Script, SCRIPT_SCHEMA};
//!
//! proptest! {
//!     #[test]
//!     fn replay_converges(script: Script) {
//!         // run the script on a recorded source, replay on a target
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use rowsync::{row, ApplyOptions};
//! use rowsync_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let session = fixture.record();
//! fixture.source.insert("users", row![1, "ann", "ann@example.com"]).unwrap();
//! assert!(fixture.sync(&session.changeset().unwrap(), ApplyOptions::new()));
//! assert!(fixture.converged("users"));
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{replicas, TestFixture, DEFAULT_SCHEMA};
pub use generators::{change_log, Script, ScriptOp, SCRIPT_SCHEMA};
pub use vectors::{all_vectors, encode_vector, verify_all_vectors, GoldenVector};
