//! # aclgraph Testkit
//!
//! Testing utilities for aclgraph.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Scenarios**: Declarative JSON steps with expected outcomes, run against any backend
//! - **Generators**: Proptest strategies for property-based testing
//! - **Reference model**: A plain in-memory re-statement of the resolution rules
//! - **Fixtures**: Helper structs for setting up test scenarios
//!
//! ## Scenarios
//!
//! The built-in scenarios must pass on every store:
//!
//! ```rust
//! use aclgraph_store::MemoryStore;
//! use aclgraph_testkit::scenarios::{builtin_scenarios, run_scenario};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! for scenario in builtin_scenarios().unwrap() {
//!     let report = run_scenario(MemoryStore::new(), &scenario).await;
//!     assert!(report.passed(), "{:?}", report.failures);
//! }
//! # });
//! ```
//!
//! ## Property Testing
//!
//! Run random programs against the service and the model:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use aclgraph_testkit::generators::program;
//! use aclgraph_testkit::model::ReferenceModel;
//!
//! proptest! {
//!     #[test]
//!     fn model_agrees(ops in program(40)) {
//!         let mut model = ReferenceModel::default();
//!         for op in &ops {
//!             model.apply(op);
//!         }
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use aclgraph_testkit::fixtures::{doc, user, AclFixture};
//!
//! let fixture = AclFixture::new();
//! let report = doc("q3-report");
//! let alice = user("alice");
//! # let _ = (fixture, report, alice);
//! ```

pub mod fixtures;
pub mod generators;
pub mod model;
pub mod scenarios;

pub use fixtures::{both_backends, AclFixture};
pub use generators::{program, AclOp};
pub use model::{apply_to_service, snapshot_service, Outcome, ReferenceModel};
pub use scenarios::{builtin_scenarios, run_scenario, Scenario, ScenarioReport};
