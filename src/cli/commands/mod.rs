pub mod describe;
pub mod serve;
pub mod token;
