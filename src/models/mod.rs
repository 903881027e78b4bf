pub mod schemas;
pub mod wiki;
