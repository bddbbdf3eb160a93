pub mod dispatch;
pub mod enumerate;
pub(crate) mod layer;
pub mod sys;
