//! Round-robin selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::selector::{ElementSelector, SelectorError};

/// Round-robin selector.
/// Stores an internal counter to rotate through the snapshot.
#[derive(Debug, Default)]
pub struct RoundRobinSelector<T> {
    elements: Vec<T>,
    counter: AtomicUsize,
}

impl<T> RoundRobinSelector<T> {
    pub fn new(elements: Vec<T>) -> Self {
        Self {
            elements,
            counter: AtomicUsize::new(0),
        }
    }
}

impl<T> ElementSelector<T> for RoundRobinSelector<T>
where
    T: Clone + Send + Sync,
{
    fn next(&self) -> Result<T, SelectorError> {
        if self.elements.is_empty() {
            return Err(SelectorError::Empty);
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.elements.len();
        Ok(self.elements[index].clone())
    }

    fn elements(&self) -> &[T] {
        &self.elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let selector = RoundRobinSelector::new(vec!["10.0.0.1:8080", "10.0.0.2:8080"]);

        assert_eq!(selector.next(), Ok("10.0.0.1:8080"));
        assert_eq!(selector.next(), Ok("10.0.0.2:8080"));
        assert_eq!(selector.next(), Ok("10.0.0.1:8080"));
    }
}
