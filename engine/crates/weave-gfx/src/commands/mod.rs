pub mod barrier;
pub mod encoder;
pub mod rendering_info;
pub mod submit_info;
