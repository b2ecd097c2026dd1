mod backend;
mod backends;
mod registry;
mod result;

pub use backend::InferenceEngine;
pub use backends::StubEngine;
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use registry::{EngineRegistry, ModelReference};
pub use result::{Detection, InputShape, PERSON_CLASS};
