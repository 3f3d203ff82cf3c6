pub mod error;
pub mod metadata;
pub mod mime;
pub mod models;
pub mod traits;

pub use error::*;
pub use metadata::*;
pub use mime::*;
pub use models::*;
pub use traits::*;
