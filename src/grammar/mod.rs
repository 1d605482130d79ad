//! Schema→grammar compiler: turns the JSON-Schema-lite subset accepted
//! on `response_format` into a GBNF-style CFG the inference engine's sampler
//! can constrain decoding against.

pub mod compiler;
pub mod schema;

pub use compiler::compile;
pub use schema::Schema;
