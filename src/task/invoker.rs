//! Procedure invocation boundary
//!
//! Calling procedures belongs to the owning system. Runners only need to
//! know what kind of procedure a name refers to and to call it.

use serde_json::Value;

use super::params::ParamValue;
use super::scope::ProcedureKind;

/// Procedure catalog and invocation supplied by the owning system
pub trait ProcedureInvoker: Send + Sync {
    /// Kind of the named procedure, or `None` if it does not exist
    fn procedure_kind(&self, name: &str) -> Option<ProcedureKind>;

    /// Call a procedure and wait for its response.
    ///
    /// `partition` is set for tasks running once per partition. An `Err` is
    /// a failed response, handed back to the scheduler; it is not a fault.
    fn invoke(&self, name: &str, params: &[ParamValue], partition: Option<u32>) -> Result<Value, String>;
}
