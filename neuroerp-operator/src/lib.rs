//! NeuroERP Kubernetes Operator
//!
//! This crate provides a Kubernetes operator that keeps NeuroERP application
//! deployments converged on their declared state.
//!
//! # Custom Resource Definitions
//!
//! - **NeuroErp**: An ERP application, deployed as one Deployment and one
//!   ClusterIP Service per module (or a single pair when no modules are declared)
//!
//! # Example
//!
//! ```yaml
//! apiVersion: erp.valeo.io/v1alpha1
//! kind: NeuroErp
//! metadata:
//!   name: erp1
//! spec:
//!   replicas: 2
//!   image: registry.valeo.io/neuroerp
//!   version: "1.4.0"
//!   resources:
//!     requests:
//!       cpu: 500m
//!       memory: 512Mi
//!   modules:
//!     - name: core
//!     - name: finance
//!       version: "1.4.1"
//!   monitoring:
//!     enabled: true
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod hooks;
pub mod resources;
pub mod store;

pub use config::OperatorConfig;
pub use crd::{NeuroErp, NeuroErpSpec, NeuroErpStatus};
pub use error::{OperatorError, OperatorResult};
