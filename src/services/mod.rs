pub mod file_decoder;
pub mod file_fetcher;
pub mod llm_service;
pub mod page_parser;
pub mod strategy;
pub mod submitter;
pub mod synthesizer;

pub use file_fetcher::FileFetcher;
pub use llm_service::LlmService;
pub use strategy::{ResolutionStrategy, StrategySelector};
pub use submitter::Submitter;
pub use synthesizer::AnswerSynthesizer;
