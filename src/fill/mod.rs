mod traits;
pub use traits::{Block, Cfg, Tx};

mod fillers;
pub use fillers::{CallFiller, ImpersonationFiller};
