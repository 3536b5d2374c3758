pub mod allocator;
pub mod datachan;
pub mod linebuf;
pub mod network;
pub mod relay;
