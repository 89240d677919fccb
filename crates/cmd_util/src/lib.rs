//! Small, dependency-light helpers shared by every binary in this
//! workspace: environment-variable parsing and tracing-subscriber setup.
//! Nothing here is specific to bulk-by-scroll; it's the same ambient
//! plumbing every service and CLI in the workspace starts from.

pub mod env;
pub mod keyvalue;
