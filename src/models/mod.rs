pub mod answer;
pub mod material;
pub mod submission;

pub use answer::Answer;
pub use material::{
    material_filename, FileMaterial, MaterialKind, MaterialSet, MediaData, TabularData,
};
pub use submission::{
    AttemptRecord, ChainState, StrategyKind, SubmitOutcome, SubmitPayload, SubmitResponse,
};
