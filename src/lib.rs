pub mod pipeline;
pub mod transport;
