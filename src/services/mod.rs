pub mod bounded;
pub mod cache;
pub mod collections;
pub mod events;
pub mod fetcher;
pub mod filters;
pub mod interleave;
pub mod language;
pub mod lead_section;
pub mod pageviews;
pub mod ranking;
pub mod sections;
pub mod sitematrix;
pub mod wiki;
