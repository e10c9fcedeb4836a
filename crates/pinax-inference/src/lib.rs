//! # pinax-inference
//!
//! Model-gateway client and the PINAX extraction pipeline.
//!
//! The gateway speaks the OpenAI chat-completions dialect (DeepInfra in
//! production); the extractor assembles prompts from a context bundle,
//! parses the JSON the model returns, post-processes it into a publishable
//! record, and runs the schema validator over the result.

pub mod extractor;
pub mod gateway;
pub mod prompts;
pub mod types;

pub use extractor::{ExtractOptions, Extraction, Extractor};
pub use gateway::{GatewayConfig, ModelGateway};
pub use types::Usage;
