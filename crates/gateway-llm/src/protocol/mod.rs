//! Wire format types for the HTTP backends
//!
//! Bedrock is not represented here; its adapter speaks through the AWS
//! SDK's own types.

pub mod openai;
pub mod vertex;
