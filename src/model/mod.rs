//! The wav2vec2 backbone and the audio classification head.

pub mod classifier;
pub mod wav2vec2;

pub use classifier::Wav2Vec2ForSequenceClassification;
pub use wav2vec2::Wav2Vec2Model;
