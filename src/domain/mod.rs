mod account;
mod moment;
mod money;
mod operation;

pub use account::*;
pub use moment::*;
pub use money::*;
pub use operation::*;
