//! Relative addressing over the commit graph.
//!
//! A [`Step`] `(branch, distance)` describes a walk from some commit:
//!
//! ```text
//!   distance == 0   stay
//!   distance  > 0   take parent #branch, then distance-1 hops along parent #1
//!   distance  < 0   move |distance| hops back toward head
//! ```
//!
//! Branches are 1-based. A [`Path`] is a sequence of steps applied from
//! head, written `*b+d*b+d...`; the default path `*1+0` goes nowhere.
//! Neither type refers to the graph, they only describe walks.

use std::fmt;
use std::str::FromStr;

use crate::error::{HydraError, HydraResult};

/// One relative move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    branch: usize,
    distance: i64,
}

impl Default for Step {
    fn default() -> Self {
        Self { branch: 1, distance: 0 }
    }
}

impl Step {
    pub fn new(branch: usize, distance: i64) -> Self {
        Self { branch, distance }
    }

    /// 1-based parent index taken by the first hop.
    pub fn branch(&self) -> usize {
        self.branch
    }

    pub fn distance(&self) -> i64 {
        self.distance
    }

    /// Compose with `other`: its branch, summed distance clamped at 0.
    pub fn shift(&self, other: &Step) -> Step {
        Step {
            branch: other.branch,
            distance: self.distance.saturating_add(other.distance).max(0),
        }
    }

    pub(crate) fn advance(&mut self) {
        self.distance += 1;
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distance < 0 {
            write!(f, "*{}-{}", self.branch, self.distance.unsigned_abs())
        } else {
            write!(f, "*{}+{}", self.branch, self.distance)
        }
    }
}

impl FromStr for Step {
    type Err = HydraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix('*')
            .ok_or_else(|| HydraError::InvalidPath(format!("step must start with '*': {:?}", s)))?;
        parse_step_body(body).ok_or_else(|| HydraError::InvalidPath(format!("malformed step: {:?}", s)))
    }
}

fn parse_step_body(body: &str) -> Option<Step> {
    let split = body.find(['+', '-'])?;
    let (branch, rest) = body.split_at(split);
    if branch.is_empty() || !branch.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let branch: usize = branch.parse().ok()?;

    let (negative, digits) = match rest.as_bytes() {
        [b'+', b'-', ..] => (true, &rest[2..]),
        [b'+', ..] => (false, &rest[1..]),
        _ => (true, &rest[1..]),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: i64 = digits.parse().ok()?;
    Some(Step::new(branch, if negative { -magnitude } else { magnitude }))
}

/// A sequence of steps, always applied from head.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    steps: Vec<Step>,
}

impl Default for Path {
    fn default() -> Self {
        Self {
            steps: vec![Step::default()],
        }
    }
}

impl Path {
    /// Build a path from steps; an empty list gives the default path.
    pub fn new(steps: Vec<Step>) -> Self {
        if steps.is_empty() {
            return Self::default();
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Extend the walk by `step`.
    ///
    /// A step on the same branch as the trailing one is folded into it with
    /// [`Step::shift`]; anything else is appended.
    pub fn move_by(&mut self, step: Step) {
        match self.steps.last_mut() {
            Some(last) if last.branch == step.branch => *last = last.shift(&step),
            _ => self.steps.push(step),
        }
    }

    /// Append `step` without folding.
    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut Step> {
        self.steps.last_mut()
    }

    pub fn parse(text: &str) -> HydraResult<Self> {
        text.parse()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = HydraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let body = s
            .strip_prefix('*')
            .ok_or_else(|| HydraError::InvalidPath(format!("path must start with '*': {:?}", s)))?;
        let steps = body
            .split('*')
            .map(|piece| {
                parse_step_body(piece)
                    .ok_or_else(|| HydraError::InvalidPath(format!("malformed step {:?} in {:?}", piece, s)))
            })
            .collect::<HydraResult<Vec<_>>>()?;
        Ok(Self::new(steps))
    }
}
