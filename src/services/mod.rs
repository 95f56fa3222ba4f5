// Services module - Business logic

pub mod qr_image;
pub mod report;
pub mod token_generator;
pub mod transition_engine;

pub use token_generator::{CodeSource, GenerationError, RandomCodeSource, TokenGenerator};
pub use transition_engine::{ProcessOutcome, Transition, TransitionEngine, TransitionError};
