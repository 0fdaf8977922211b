// Pipeline processing: parsing, normalization, validation, and publication prep

pub mod change_detect;
pub mod dedupe;
pub mod normalize;
pub mod parser;
pub mod quality_gate;
