mod memory;

pub use memory::{InMemoryConfigStore, InMemoryInstrumentStore, InMemoryLedger};
