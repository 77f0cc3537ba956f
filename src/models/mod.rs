pub mod endpoint;
pub mod outbound;
pub mod routing;

pub use endpoint::*;
pub use outbound::*;
pub use routing::*;
