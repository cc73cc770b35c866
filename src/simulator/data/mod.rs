pub mod memfile;
pub mod patterns;

pub use memfile::{read_mem, write_mem, MemFormat};
