//! Element selector abstraction.
//!
//! A selector is built once from an immutable list of candidates and only
//! ever picks from that list. Membership changes build a new selector; they
//! never touch an existing one.

use std::str::FromStr;
use std::sync::Arc;

use serde::de::value::{Error as NameError, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::load_balancer::random::RandomSelector;
use crate::load_balancer::round_robin::RoundRobinSelector;

/// Errors raised by a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectorError {
    /// The snapshot has no candidates.
    #[error("selector has no candidates")]
    Empty,
}

/// Picks one element out of a fixed snapshot.
pub trait ElementSelector<T>: Send + Sync {
    /// Pick the next element.
    fn next(&self) -> Result<T, SelectorError>;

    /// The snapshot this selector picks from.
    fn elements(&self) -> &[T];

    fn len(&self) -> usize {
        self.elements().len()
    }

    fn is_empty(&self) -> bool {
        self.elements().is_empty()
    }
}

/// Boxed selector as stored in the snapshot cells.
pub type BoxSelector<T> = Box<dyn ElementSelector<T>>;

/// Builds selectors from candidate lists.
pub trait SelectorFactory<T>: Send + Sync {
    fn create(&self, elements: Vec<T>) -> BoxSelector<T>;
}

impl<T, F> SelectorFactory<T> for F
where
    F: Fn(Vec<T>) -> BoxSelector<T> + Send + Sync,
{
    fn create(&self, elements: Vec<T>) -> BoxSelector<T> {
        self(elements)
    }
}

/// Shared factory handle.
pub type SharedSelectorFactory<T> = Arc<dyn SelectorFactory<T>>;

/// Built-in strategies, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    /// Uniform random pick.
    #[default]
    Random,
    /// Rotate through the snapshot.
    #[serde(alias = "round-robin")]
    RoundRobin,
}

/// Accepts the configuration names, so command-line overrides match the TOML file.
impl FromStr for SelectorStrategy {
    type Err = NameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let deserializer: StrDeserializer<'_, NameError> = name.into_deserializer();
        Self::deserialize(deserializer)
    }
}

impl<T> SelectorFactory<T> for SelectorStrategy
where
    T: Clone + Send + Sync + 'static,
{
    fn create(&self, elements: Vec<T>) -> BoxSelector<T> {
        match self {
            SelectorStrategy::Random => Box::new(RandomSelector::new(elements)),
            SelectorStrategy::RoundRobin => Box::new(RoundRobinSelector::new(elements)),
        }
    }
}

impl SelectorStrategy {
    /// Wrap the strategy as a shared factory.
    pub fn into_factory<T>(self) -> SharedSelectorFactory<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Arc::new(self)
    }
}
