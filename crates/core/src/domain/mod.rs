pub mod highlight;
pub mod ids;
pub mod member;
pub mod message;
