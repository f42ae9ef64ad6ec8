pub mod outcome;

pub use outcome::{classify, Observation, Outcome};
