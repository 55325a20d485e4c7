pub mod screen;
pub mod snapshot_codec;
