pub mod room;
pub mod summarizer;
