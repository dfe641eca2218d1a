pub mod envelope;
pub mod result;
pub mod route;
