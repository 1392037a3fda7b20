pub mod error;
pub mod heap;
pub mod logging;
pub mod nut;
pub mod util;

pub use error::{MillError, Result};
