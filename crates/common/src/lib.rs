// lexhub-common: shared types and protocol definitions for the LexHub workspace

pub mod protocol;
pub mod types;
