// Wait Queue Domain Model

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Where a unit lands when it has to wait for capacity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Append at the tail (FIFO)
    #[default]
    Back,
    /// Insert at the head, ahead of everything already waiting
    Front,
}

impl From<bool> for Placement {
    /// `true` is the "unshift" flag: jump the queue
    fn from(priority: bool) -> Self {
        if priority {
            Placement::Front
        } else {
            Placement::Back
        }
    }
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Placement::Back => write!(f, "BACK"),
            Placement::Front => write!(f, "FRONT"),
        }
    }
}

/// Ordered backlog of not-yet-admitted items.
///
/// Back pushes are serviced FIFO. Front pushes are serviced before every
/// back push, most recent front push first.
#[derive(Debug)]
pub struct WaitQueue<T> {
    items: VecDeque<T>,
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T, placement: Placement) {
        match placement {
            Placement::Back => self.items.push_back(item),
            Placement::Front => self.items.push_front(item),
        }
    }

    /// Push a group of items while keeping the group's own order.
    ///
    /// With `Front` the whole group goes ahead of the waiting items, first
    /// element of the group first.
    pub fn extend(&mut self, group: impl IntoIterator<Item = T>, placement: Placement) {
        match placement {
            Placement::Back => self.items.extend(group),
            Placement::Front => {
                let group: Vec<T> = group.into_iter().collect();
                for item in group.into_iter().rev() {
                    self.items.push_front(item);
                }
            }
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every waiting item, head first
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_all(queue: &mut WaitQueue<&'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn test_back_pushes_are_fifo() {
        let mut queue = WaitQueue::new();
        queue.push("a", Placement::Back);
        queue.push("b", Placement::Back);
        queue.push("c", Placement::Back);

        assert_eq!(drain_all(&mut queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_front_pushes_jump_and_are_lifo() {
        let mut queue = WaitQueue::new();
        queue.push("a", Placement::Back);
        queue.push("b", Placement::Back);
        queue.push("p1", Placement::Front);
        queue.push("p2", Placement::Front);
        queue.push("c", Placement::Back);

        assert_eq!(drain_all(&mut queue), vec!["p2", "p1", "a", "b", "c"]);
    }

    #[test]
    fn test_front_group_keeps_its_order() {
        let mut queue = WaitQueue::new();
        queue.push("waiting", Placement::Back);
        queue.extend(["x", "y", "z"], Placement::Front);

        assert_eq!(drain_all(&mut queue), vec!["x", "y", "z", "waiting"]);
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = WaitQueue::new();
        queue.extend(["a", "b"], Placement::Back);

        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_placement_from_priority_flag() {
        assert_eq!(Placement::from(true), Placement::Front);
        assert_eq!(Placement::from(false), Placement::Back);
        assert_eq!(Placement::default(), Placement::Back);
    }
}
