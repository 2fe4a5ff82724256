pub mod presence;
pub mod room;
pub mod sync;
