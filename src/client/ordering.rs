//! Deterministic ordering of the local collection.
//!
//! Two stable passes: case-insensitive title order first, then priority
//! rank. Because the second pass is stable, the title order survives as the
//! tie-break within each priority group — the visible order is priority
//! groups Hi-Pri, Medium, Low, alphabetical inside each group. A non-stable
//! sort here would produce a non-reproducible order and is a correctness
//! bug, not a performance choice.

use crate::client::store::LocalTask;
use std::cmp::Ordering;

/// Case-insensitive title comparison (Unicode lowercase, not ASCII-only).
pub fn title_order(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Apply the ordering policy to the whole collection.
pub fn sort_tasks(tasks: &mut [LocalTask]) {
    // Vec::sort_by and sort_by_key are stable — required, see module docs.
    tasks.sort_by(|a, b| title_order(&a.task.title, &b.task.title));
    tasks.sort_by_key(|t| t.task.priority.rank());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Priority, Task};
    use proptest::prelude::*;

    fn local(title: &str, priority: Priority) -> LocalTask {
        LocalTask {
            task: Task {
                id: title.to_string(),
                title: title.to_string(),
                priority,
                completed: false,
                created_by: "a".to_string(),
                assigned_to: "a".to_string(),
            },
            editing: false,
            synced: true,
        }
    }

    #[test]
    fn priority_groups_then_alphabetical() {
        let mut tasks = vec![
            local("zebra", Priority::Low),
            local("apple", Priority::Low),
            local("mango", Priority::HiPri),
            local("Banana", Priority::Medium),
            local("avocado", Priority::Medium),
            local("cherry", Priority::HiPri),
        ];
        sort_tasks(&mut tasks);
        let titles: Vec<&str> = tasks.iter().map(|t| t.task.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["cherry", "mango", "avocado", "Banana", "apple", "zebra"]
        );
    }

    #[test]
    fn title_order_ignores_case() {
        assert_eq!(title_order("Apple", "apple"), Ordering::Equal);
        assert_eq!(title_order("apple", "Banana"), Ordering::Less);
        assert_eq!(title_order("ärger", "Ärger"), Ordering::Equal);
    }

    #[test]
    fn sort_is_idempotent() {
        let mut once = vec![
            local("b", Priority::Medium),
            local("a", Priority::HiPri),
            local("c", Priority::Medium),
        ];
        sort_tasks(&mut once);
        let mut twice = once.clone();
        sort_tasks(&mut twice);
        assert_eq!(once, twice);
    }

    proptest! {
        #[test]
        fn sorted_collection_is_grouped_and_alphabetical(
            entries in prop::collection::vec(("[a-zA-Z]{0,12}", 0u8..3), 0..40)
        ) {
            let mut tasks: Vec<LocalTask> = entries
                .into_iter()
                .map(|(title, p)| {
                    let priority = match p {
                        0 => Priority::HiPri,
                        1 => Priority::Medium,
                        _ => Priority::Low,
                    };
                    local(&title, priority)
                })
                .collect();
            sort_tasks(&mut tasks);

            for pair in tasks.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(a.task.priority.rank() <= b.task.priority.rank());
                if a.task.priority.rank() == b.task.priority.rank() {
                    prop_assert!(title_order(&a.task.title, &b.task.title) != Ordering::Greater);
                }
            }
        }
    }
}
