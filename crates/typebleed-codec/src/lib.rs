pub mod profile;
pub mod reconstruct;
pub mod stylesheet;
pub mod templates;

pub use profile::{CharacterProfile, DetectedPattern, Lexicon};
pub use reconstruct::{
    dynamic_set, leaked_bits, Candidate, CandidateGenerator, CandidateStream, ReconstructionEngine,
    ReconstructionResult,
};
pub use stylesheet::FontFaceSheet;
pub use templates::{
    parse_pattern, CharClass, PatternToken, SlotGrammar, TemplateCatalog, TemplateModel,
};
