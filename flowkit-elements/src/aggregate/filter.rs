use std::fmt;

use flowkit_packet::{Outputs, Packet, Push};
use tracing::{trace, warn};

use super::pattern::{AggregateRange, FilterAction, FilterRule, PatternError};
use crate::{ConfigError, ConfigErrors};

const NBUCKETS: usize = 256;
const GROUPMASK: u32 = !0xFF;
const INGROUPMASK: u32 = 0xFF;

/// The actions of 256 consecutive aggregates sharing their upper 24 bits.
struct Group {
    groupno: u32,
    filters: Box<[Option<FilterAction>; 256]>,
}

impl Group {
    fn new(groupno: u32) -> Self {
        Self { groupno, filters: Box::new([None; 256]) }
    }
}

#[inline]
fn bucket_of(aggregate: u32) -> usize {
    (aggregate >> 8) as usize % NBUCKETS
}

/// Options for an [`AggregateFilter`].
#[derive(Debug, Clone)]
pub struct AggregateFilterOptions {
    /// Number of output ports.
    outputs: usize,
    /// Action for aggregates no rule names.
    default_action: FilterAction,
    rules: Vec<Result<FilterRule, PatternError>>,
}

impl Default for AggregateFilterOptions {
    fn default() -> Self {
        Self { outputs: 1, default_action: FilterAction::Drop, rules: Vec::new() }
    }
}

impl AggregateFilterOptions {
    /// Sets the number of output ports.
    pub fn outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }

    /// Sets the action for aggregates that no rule names.
    pub fn default_action(mut self, action: FilterAction) -> Self {
        self.default_action = action;
        self
    }

    /// Appends a rule in `ACTION AGGREGATES...` form. Parse errors are reported when the filter
    /// is built.
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.rules.push(pattern.parse());
        self
    }

    /// Appends a parsed rule.
    pub fn rule(mut self, rule: FilterRule) -> Self {
        self.rules.push(Ok(rule));
        self
    }
}

/// Classifies packets by their aggregate annotation.
///
/// Rules are applied in order, and an aggregate named by more than one rule keeps the action of
/// the first. Aggregates are stored in 256 hash buckets of groups; a looked-up group moves to the
/// front of its bucket.
pub struct AggregateFilter {
    buckets: Vec<Vec<Group>>,
    /// Action for every aggregate a rule named with `*`.
    wildcard: Option<FilterAction>,
    default_action: FilterAction,
    outputs: Outputs,
}

impl fmt::Debug for AggregateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateFilter")
            .field("groups", &self.buckets.iter().map(Vec::len).sum::<usize>())
            .field("wildcard", &self.wildcard)
            .field("default_action", &self.default_action)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl AggregateFilter {
    /// Builds the filter, reporting every malformed rule.
    pub fn try_new(options: AggregateFilterOptions) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let outputs = options.outputs;
        errors.check(outputs > 0, || ConfigError::Zero("number of outputs"));

        let check_port = |errors: &mut ConfigErrors, action: FilterAction| {
            if let FilterAction::Port(port) = action {
                errors.check(port < outputs, || ConfigError::PortOutOfRange { port, outputs });
            }
        };
        check_port(&mut errors, options.default_action);

        let mut rules = Vec::with_capacity(options.rules.len());
        for rule in options.rules {
            match rule {
                Ok(rule) => {
                    check_port(&mut errors, rule.action);
                    rules.push(rule);
                }
                Err(e) => errors.push(e),
            }
        }

        let mut filter = errors.finish(Self {
            buckets: (0..NBUCKETS).map(|_| Vec::new()).collect(),
            wildcard: None,
            default_action: options.default_action,
            outputs: Outputs::new(outputs),
        })?;

        for (i, rule) in rules.iter().enumerate() {
            let conflicts = filter.apply(rule);
            if conflicts > 0 {
                warn!(
                    rule = i,
                    conflicts,
                    "pattern overlaps earlier patterns, keeping their actions"
                );
            }
        }

        Ok(filter)
    }

    /// Connects output `port`.
    pub fn connect(mut self, port: usize, sink: impl Push + Send + 'static) -> Self {
        self.outputs = self.outputs.connect(port, sink);
        self
    }

    /// Applies `rule`, returning the number of aggregates it tried to reassign.
    fn apply(&mut self, rule: &FilterRule) -> u64 {
        let mut conflicts = 0;
        for range in &rule.aggregates {
            match *range {
                AggregateRange::All => match self.wildcard {
                    Some(action) if action != rule.action => conflicts += 1,
                    Some(_) => {}
                    None => self.wildcard = Some(rule.action),
                },
                AggregateRange::Range(start, end) => {
                    for aggregate in start..=end {
                        if !self.assign(aggregate, rule.action) {
                            conflicts += 1;
                        }
                    }
                }
            }
        }
        conflicts
    }

    /// Sets the action of `aggregate` unless it already has a different one.
    fn assign(&mut self, aggregate: u32, action: FilterAction) -> bool {
        if self.wildcard.is_some_and(|w| w != action) {
            return false;
        }

        let slot = &mut self.find_group(aggregate).filters[(aggregate & INGROUPMASK) as usize];
        match *slot {
            Some(existing) => existing == action,
            None => {
                *slot = Some(action);
                true
            }
        }
    }

    /// Finds the group holding `aggregate`, creating it at the front of its bucket if needed.
    fn find_group(&mut self, aggregate: u32) -> &mut Group {
        let groupno = aggregate & GROUPMASK;
        let bucket = &mut self.buckets[bucket_of(aggregate)];

        match bucket.iter().position(|g| g.groupno == groupno) {
            Some(i) => bucket[..=i].rotate_right(1),
            None => bucket.insert(0, Group::new(groupno)),
        }
        &mut bucket[0]
    }

    /// Resolves the action for `aggregate`. Moves the aggregate's group, if any, to the front of
    /// its bucket.
    pub fn lookup(&mut self, aggregate: u32) -> FilterAction {
        let groupno = aggregate & GROUPMASK;
        let bucket = &mut self.buckets[bucket_of(aggregate)];

        if let Some(i) = bucket.iter().position(|g| g.groupno == groupno) {
            bucket[..=i].rotate_right(1);
            if let Some(action) = bucket[0].filters[(aggregate & INGROUPMASK) as usize] {
                return action;
            }
        }

        self.wildcard.unwrap_or(self.default_action)
    }
}

impl Push for AggregateFilter {
    fn push(&mut self, packet: Packet) {
        let aggregate = packet.anno().aggregate;
        match self.lookup(aggregate) {
            FilterAction::Port(port) => {
                self.outputs.checked_push(port, packet);
            }
            FilterAction::Drop => trace!(aggregate, "dropping packet"),
        }
    }
}
