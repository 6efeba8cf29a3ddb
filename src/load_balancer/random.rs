//! Uniform random selection.

use rand::Rng;

use crate::load_balancer::selector::{ElementSelector, SelectorError};

/// Random selector.
/// Keeps no state between calls, so repeated picks may repeat.
#[derive(Debug, Clone)]
pub struct RandomSelector<T> {
    elements: Vec<T>,
}

impl<T> RandomSelector<T> {
    pub fn new(elements: Vec<T>) -> Self {
        Self { elements }
    }
}

impl<T> ElementSelector<T> for RandomSelector<T>
where
    T: Clone + Send + Sync,
{
    fn next(&self) -> Result<T, SelectorError> {
        match self.elements.len() {
            0 => Err(SelectorError::Empty),
            1 => Ok(self.elements[0].clone()),
            len => Ok(self.elements[rand::thread_rng().gen_range(0..len)].clone()),
        }
    }

    fn elements(&self) -> &[T] {
        &self.elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_covers_every_candidate() {
        let selector = RandomSelector::new(vec!["a", "b", "c", "d"]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2_000 {
            seen.insert(selector.next().unwrap());
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_random_single_and_empty() {
        assert_eq!(RandomSelector::new(vec![7]).next(), Ok(7));
        assert_eq!(RandomSelector::<u8>::new(Vec::new()).next(), Err(SelectorError::Empty));
    }
}
