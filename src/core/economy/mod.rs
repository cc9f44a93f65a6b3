// Economy module - the port to externally supplied currency backends.

mod provider;

pub use provider::{EconomyError, EconomyProvider, NullEconomyProvider};
