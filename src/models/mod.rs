pub mod layout;
pub mod perovskite;

pub use layout::{Layout, RowKind};
pub use perovskite::Params;
