//! Platform collaborators the monitoring cycle drives: desktop notifications
//! and the power-off request.

pub mod notify;
pub mod shutdown;
