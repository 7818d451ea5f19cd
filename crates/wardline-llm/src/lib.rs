pub mod mock;
pub mod ndjson;
pub mod ollama;
pub mod provider;

pub use mock::{MockProvider, MockResponse};
pub use ollama::OllamaProvider;
pub use provider::{ChatOptions, ChatProvider};
