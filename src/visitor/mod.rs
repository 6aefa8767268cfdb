pub mod attributionvisitor;
pub mod imputevisitor;
pub mod scorevisitor;
pub mod visitor;
