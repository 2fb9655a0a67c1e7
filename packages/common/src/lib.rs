pub mod descriptor;
pub mod error;
pub mod host;
pub mod ids;
pub mod path;
pub mod value;

pub use descriptor::*;
pub use error::*;
pub use host::*;
pub use ids::*;
pub use path::*;
pub use value::*;
