pub mod config;
pub mod datastore;
pub mod error;
pub mod execution;
pub mod plan;
pub mod value;

pub use config::ExecConfig;
pub use error::{ExecError, ExecResult};
pub use execution::{build_operator, build_root, execute, Context, Operator};
pub use plan::{PlanArena, PlanId, PlanKind, PlanNode};
pub use value::AnnotatedValue;
