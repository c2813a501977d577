pub mod anvisa;
pub mod prod_db;
