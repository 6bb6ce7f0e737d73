//! Custom Resource Definitions for the NeuroErp operator.
//!
//! - [`NeuroErp`]: An ERP application deployment

mod erp;

pub use erp::{
    ComponentPhase, ComponentStatus, ErpCondition, ErpPhase, Feature, FeatureSpec, ModuleSpec,
    NeuroErp, NeuroErpSpec, NeuroErpStatus, ResourceRequirements,
};
