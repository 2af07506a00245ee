//! Recent-items repository trait.

use super::model::RecentItem;
use crate::error::Result;

/// Durable storage for the recent-items ledger.
///
/// The ledger is small and bounded, so the whole list is read and written at
/// once. Calls are synchronous: closing a panel must not suspend.
pub trait RecentItemRepository: Send + Sync {
    /// Loads the persisted list, most recent first.
    ///
    /// Returns an empty list when nothing has been stored yet.
    fn load(&self) -> Result<Vec<RecentItem>>;

    /// Replaces the persisted list.
    fn save(&self, items: &[RecentItem]) -> Result<()>;
}
