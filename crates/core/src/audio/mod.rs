pub mod analysis;
pub mod buffer;
pub mod dynamics;
pub mod effects;
pub mod io;

pub use buffer::AudioBuffer;
