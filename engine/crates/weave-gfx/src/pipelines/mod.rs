pub mod descriptor;
pub mod pipeline;
pub mod shader;
