pub mod rating;
pub mod record;
pub mod title;
