pub mod creds;
pub mod signal;

pub use creds::*;
pub use signal::*;
