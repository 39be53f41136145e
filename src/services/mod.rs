pub mod breaker;
pub mod imaging;
pub mod limiter;
pub mod ocr;
pub mod pipeline;
pub mod storage;
pub mod token;
pub mod walker;
