//! Recent-items domain module.

mod model;
mod repository;

pub use model::RecentItem;
pub use repository::RecentItemRepository;
