pub mod cancel;
pub mod config;
pub mod errors;
pub mod hash;
pub mod scanner;
pub mod storage;
pub mod task;
pub mod verifier;
