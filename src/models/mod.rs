pub mod authorship;
pub mod diagnostics;
pub mod error;
pub mod messages;
pub mod note;
pub mod permission;

pub use authorship::*;
pub use diagnostics::*;
pub use error::*;
pub use messages::*;
pub use note::*;
pub use permission::*;
