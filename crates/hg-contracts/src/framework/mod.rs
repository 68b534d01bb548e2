mod store;

pub use store::{Driver, FrameworkStore, LexiconTerm, Principle};
