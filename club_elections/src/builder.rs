use std::sync::Arc;

pub use crate::config::*;
use crate::ports::{ActivitySink, Clock, LogActivitySink, SystemClock};
use crate::store::Store;
use crate::Elections;

/// A builder for wiring the election core to its collaborators.
///
/// The defaults are the system clock and an activity log written through
/// the `log` facade.
///
/// ```
/// use std::sync::Arc;
/// use club_elections::*;
///
/// let activity = Arc::new(MemoryActivitySink::new());
/// let elections = ElectionsBuilder::new(&ElectionRules::DEFAULT_RULES)
///     .activity(activity.clone())
///     .build(Store::in_memory()?);
/// assert!(elections.clubs()?.is_empty());
/// # Ok::<(), ElectionError>(())
/// ```
pub struct ElectionsBuilder {
    pub(crate) _rules: ElectionRules,
    pub(crate) _clock: Arc<dyn Clock>,
    pub(crate) _activity: Arc<dyn ActivitySink>,
}

impl ElectionsBuilder {
    pub fn new(rules: &ElectionRules) -> ElectionsBuilder {
        ElectionsBuilder {
            _rules: rules.clone(),
            _clock: Arc::new(SystemClock),
            _activity: Arc::new(LogActivitySink),
        }
    }

    pub fn clock(self, clock: Arc<dyn Clock>) -> ElectionsBuilder {
        ElectionsBuilder {
            _clock: clock,
            ..self
        }
    }

    /// Where activity records go once an operation has committed.
    pub fn activity(self, activity: Arc<dyn ActivitySink>) -> ElectionsBuilder {
        ElectionsBuilder {
            _activity: activity,
            ..self
        }
    }

    pub fn build(self, store: Store) -> Elections {
        Elections {
            store,
            clock: self._clock,
            activity: self._activity,
            rules: self._rules,
        }
    }
}
