//! Outgoing rules between stages

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

/// Caller-defined label returned by a conditional route
///
/// `all()` lists every variant so that a graph can reject label maps that
/// leave a variant unrouted.
pub trait RouteLabel: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every variant of the label type
    fn all() -> &'static [Self];
}

/// Where a rule sends the run next
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    /// Continue with the named stage
    Stage(String),
    /// Finish the run
    End,
}

impl RouteTarget {
    /// Target stage name, `None` for [`RouteTarget::End`]
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage(name) => Some(name),
            Self::End => None,
        }
    }
}

impl From<&str> for RouteTarget {
    fn from(name: &str) -> Self {
        Self::Stage(name.to_string())
    }
}

impl From<String> for RouteTarget {
    fn from(name: String) -> Self {
        Self::Stage(name)
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(name) => f.write_str(name),
            Self::End => f.write_str("<end>"),
        }
    }
}

type Resolver<S> = Arc<dyn Fn(&S) -> Option<RouteTarget> + Send + Sync>;

/// Type-erased conditional route
pub(crate) struct ConditionalRoute<S> {
    resolve: Resolver<S>,
    pub(crate) targets: Vec<RouteTarget>,
    pub(crate) unmapped: Vec<String>,
}

impl<S> Clone for ConditionalRoute<S> {
    fn clone(&self) -> Self {
        Self {
            resolve: Arc::clone(&self.resolve),
            targets: self.targets.clone(),
            unmapped: self.unmapped.clone(),
        }
    }
}

impl<S: 'static> ConditionalRoute<S> {
    pub(crate) fn new<L, P>(predicate: P, map: Vec<(L, RouteTarget)>) -> Self
    where
        L: RouteLabel,
        P: Fn(&S) -> L + Send + Sync + 'static,
    {
        let unmapped = L::all()
            .iter()
            .filter(|label| !map.iter().any(|(l, _)| l == *label))
            .map(|label| format!("{label:?}"))
            .collect();
        let targets = map.iter().map(|(_, t)| t.clone()).collect();
        let resolve: Resolver<S> = Arc::new(move |state: &S| {
            let label = predicate(state);
            map.iter()
                .find(|(l, _)| *l == label)
                .map(|(_, target)| target.clone())
        });
        Self {
            resolve,
            targets,
            unmapped,
        }
    }

    pub(crate) fn resolve(&self, state: &S) -> Option<RouteTarget> {
        (self.resolve)(state)
    }
}

/// The single outgoing rule of a stage
pub(crate) enum Rule<S> {
    Direct(RouteTarget),
    Conditional(ConditionalRoute<S>),
}

impl<S> Clone for Rule<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(t) => Self::Direct(t.clone()),
            Self::Conditional(c) => Self::Conditional(c.clone()),
        }
    }
}

impl<S> Rule<S> {
    pub(crate) fn targets(&self) -> Vec<&RouteTarget> {
        match self {
            Self::Direct(t) => vec![t],
            Self::Conditional(c) => c.targets.iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Gate {
        Open,
        Shut,
    }

    impl RouteLabel for Gate {
        fn all() -> &'static [Self] {
            &[Self::Open, Self::Shut]
        }
    }

    #[test]
    fn unmapped_labels_collected() {
        let route = ConditionalRoute::<u32>::new(|_| Gate::Open, vec![(Gate::Open, "a".into())]);
        assert_eq!(route.unmapped, vec!["Shut".to_string()]);
    }

    #[test]
    fn resolves_by_predicate() {
        let route = ConditionalRoute::<u32>::new(
            |n| if *n > 3 { Gate::Open } else { Gate::Shut },
            vec![(Gate::Open, "next".into()), (Gate::Shut, RouteTarget::End)],
        );
        assert_eq!(route.resolve(&5), Some(RouteTarget::Stage("next".into())));
        assert_eq!(route.resolve(&1), Some(RouteTarget::End));
        assert!(route.unmapped.is_empty());
    }
}
