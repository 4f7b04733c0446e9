pub mod enhance;
pub mod recognize;

pub use enhance::{EnhanceError, ImageEnhancer, LocalEnhancer};
pub use recognize::{
    HttpRecognizer, MockRecognizer, RecognizeError, RecognizedText, TextRecognizer,
    UnavailableRecognizer,
};
