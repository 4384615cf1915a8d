//! Application layer orchestrating the domain against the storage ports.
//!
//! Each service owns one concern (wallets, orders, payments, streaks,
//! insights, the batch scheduler) and receives its collaborators at
//! construction. `EngineServices` wires them together.

pub mod insights;
pub mod locks;
pub mod orders;
pub mod payments;
pub mod scheduler;
pub mod services;
pub mod streaks;
pub mod wallet;

use serde::{Deserialize, Serialize};

/// One page of a newest-first listing. Pages are 1-based.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn slice(items: Vec<T>, page: u32, limit: u32) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total = items.len();
        let skip = (page as usize - 1).saturating_mul(limit as usize);
        let items = items.into_iter().skip(skip).take(limit as usize).collect();
        Self {
            items,
            page,
            limit,
            total,
        }
    }

    pub fn has_more(&self) -> bool {
        (self.page as usize).saturating_mul(self.limit as usize) < self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_slice() {
        let page = Page::slice((1..=25).collect::<Vec<_>>(), 2, 10);
        assert_eq!(page.items, (11..=20).collect::<Vec<_>>());
        assert_eq!(page.total, 25);
        assert!(page.has_more());

        let last = Page::slice((1..=25).collect::<Vec<_>>(), 3, 10);
        assert_eq!(last.items.len(), 5);
        assert!(!last.has_more());

        let clamped = Page::slice(vec![1, 2, 3], 0, 0);
        assert_eq!((clamped.page, clamped.limit), (1, 1));
        assert_eq!(clamped.items, vec![1]);
    }
}
