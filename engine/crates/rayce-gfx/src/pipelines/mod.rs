pub mod rt_pipeline;
pub mod sbt;
pub mod shader;
