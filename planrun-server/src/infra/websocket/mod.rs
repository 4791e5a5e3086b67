pub mod messages;

pub use messages::snapshot_frame;
