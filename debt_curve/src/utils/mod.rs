pub mod contracts;
pub mod logger;
pub mod math_helper;
pub mod retry;
