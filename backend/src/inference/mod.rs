pub mod model;
#[cfg(feature = "onnx")]
mod onnx;
pub mod pipeline;
pub mod preprocess;
#[cfg(feature = "torch")]
mod torch;
