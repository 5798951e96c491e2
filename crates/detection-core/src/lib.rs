pub mod error;
pub mod expr;
pub mod traits;
pub mod types;

pub use error::*;
pub use expr::*;
pub use traits::*;
pub use types::*;
