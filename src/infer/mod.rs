mod backend;
mod backends;
mod gateway;
mod model;

pub use backend::InferenceBackend;
pub use backends::IdentityBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use gateway::InferenceGateway;
pub use model::{model_digest, stage_model, verify_model_digest, StagedModel};
