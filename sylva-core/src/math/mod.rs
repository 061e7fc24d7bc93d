mod bounds;
pub use self::bounds::*;

mod stats;
pub use self::stats::*;
