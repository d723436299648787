//! Messages exchanged between the query core and the service around it.
//!
//! The transport itself lives outside this workspace; these types are what
//! it carries in both directions.

pub mod progress;
pub mod search;

pub use progress::{ProgressMessage, ProgressStatus};
pub use search::{QueryRequest, Requested, ResumeRequest, RunScope};
