use std::{fmt, str::FromStr};

use thiserror::Error;

/// Largest number of aggregates a single range may name.
pub(crate) const MAX_RANGE_LEN: u64 = 1 << 20;

/// Errors parsing a filter rule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    /// The rule is blank.
    #[error("empty pattern")]
    Empty,
    /// The action is neither a keyword nor a port number.
    #[error("unknown action `{0}`")]
    Action(String),
    /// The rule has an action but no aggregates.
    #[error("pattern `{0}` names no aggregates")]
    NoAggregates(String),
    /// An aggregate is not a number, range or `*`.
    #[error("bad aggregate `{0}`")]
    Aggregate(String),
    /// The range ends before it starts.
    #[error("empty range {0}-{1}")]
    EmptyRange(u32, u32),
    /// The range is too large.
    #[error("range {0}-{1} names more than {MAX_RANGE_LEN} aggregates")]
    RangeTooLarge(u32, u32),
}

/// What an [`AggregateFilter`](super::AggregateFilter) does with an aggregate's packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Emit on this output port.
    Port(usize),
    /// Drop the packet.
    Drop,
}

impl FromStr for FilterAction {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Port(0)),
            "deny" | "drop" => Ok(Self::Drop),
            other => other.parse().map(Self::Port).map_err(|_| PatternError::Action(s.to_owned())),
        }
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(port) => write!(f, "{port}"),
            Self::Drop => f.write_str("drop"),
        }
    }
}

/// A set of aggregate values named by a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateRange {
    /// `start..=end`.
    Range(u32, u32),
    /// Every aggregate.
    All,
}

impl FromStr for AggregateRange {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" || s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let parse = |n: &str| n.parse::<u32>().map_err(|_| PatternError::Aggregate(s.to_owned()));
        let (start, end) = match s.split_once('-') {
            Some((start, end)) => (parse(start)?, parse(end)?),
            None => {
                let n = parse(s)?;
                (n, n)
            }
        };

        if start > end {
            return Err(PatternError::EmptyRange(start, end));
        }
        if u64::from(end - start) >= MAX_RANGE_LEN {
            return Err(PatternError::RangeTooLarge(start, end));
        }

        Ok(Self::Range(start, end))
    }
}

/// A filter rule: `ACTION AGGREGATES...`, for example `allow 1-10 15` or `drop *`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    /// What to do with matching packets.
    pub action: FilterAction,
    /// The aggregates the rule names.
    pub aggregates: Vec<AggregateRange>,
}

impl FromStr for FilterRule {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let action = words.next().ok_or(PatternError::Empty)?.parse()?;
        let aggregates = words.map(str::parse).collect::<Result<Vec<_>, _>>()?;

        if aggregates.is_empty() {
            return Err(PatternError::NoAggregates(s.trim().to_owned()));
        }

        Ok(Self { action, aggregates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules() {
        let rule: FilterRule = "allow 1-10 15".parse().unwrap();
        assert_eq!(rule.action, FilterAction::Port(0));
        assert_eq!(
            rule.aggregates,
            vec![AggregateRange::Range(1, 10), AggregateRange::Range(15, 15)]
        );

        let rule: FilterRule = "  DENY   all ".parse().unwrap();
        assert_eq!(rule.action, FilterAction::Drop);
        assert_eq!(rule.aggregates, vec![AggregateRange::All]);

        assert_eq!("3 *".parse::<FilterRule>().unwrap().action, FilterAction::Port(3));
    }

    #[test]
    fn rejects_bad_rules() {
        assert_eq!("".parse::<FilterRule>(), Err(PatternError::Empty));
        assert_eq!("allow".parse::<FilterRule>(), Err(PatternError::NoAggregates("allow".into())));
        assert_eq!("forward 1".parse::<FilterRule>(), Err(PatternError::Action("forward".into())));
        assert_eq!("allow 1-x".parse::<FilterRule>(), Err(PatternError::Aggregate("1-x".into())));
        assert_eq!("allow 9-3".parse::<FilterRule>(), Err(PatternError::EmptyRange(9, 3)));
        assert!(matches!(
            "allow 0-4294967295".parse::<FilterRule>(),
            Err(PatternError::RangeTooLarge(0, u32::MAX))
        ));
    }
}
