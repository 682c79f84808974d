pub mod builders;

// Re-export commonly used test utilities
pub use builders::{tiny_config, CorpusFixture};
