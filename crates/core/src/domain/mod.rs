pub mod actor;
pub mod budget;
pub mod decision;
pub mod escalation;
pub mod product;
