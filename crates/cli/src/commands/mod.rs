// CLI command implementations

pub mod call;
pub mod tools;
pub mod worker;
