pub mod merge;
pub mod overlap;
pub mod parse;
pub mod similarity;
pub mod validate;

pub use merge::Merger;
pub use overlap::find_overlap;
pub use parse::FieldParser;
pub use similarity::similarity;
pub use validate::Validator;
