//! Secret Santa assignment generator.
//!
//! Given a roster of at least three distinct participants, [`generate`]
//! produces a randomized derangement: every participant gives to exactly one
//! other and receives from exactly one other, and nobody draws themselves.
//!
//! The construction is a randomized greedy pick from a shrinking receiver
//! pool with a bounded retry budget, falling back to a shuffle-then-cyclic-
//! shift when the greedy phase paints itself into a corner. The result is
//! always a valid derangement, but the distribution over derangements is not
//! perfectly uniform: early picks constrain later ones, and the cyclic
//! fallback only produces single-cycle mappings. That bias is accepted for
//! this domain; fairness here is "good enough", not statistical.

use rand::seq::SliceRandom;
use rand::thread_rng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

pub type ParticipantId = String;

/// Minimum roster size for a draw. Below three, a no-self mapping is either
/// impossible (n=1) or reveals everyone's match (n=2).
pub const MIN_PARTICIPANTS: usize = 3;

/// Random picks attempted per giver before giving up on the greedy phase.
const MAX_PICK_ATTEMPTS: usize = 100;

/// One giver/receiver pair within a completed draw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub giver: ParticipantId,
    pub receiver: ParticipantId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("at least {MIN_PARTICIPANTS} participants required, got {found}")]
    InsufficientParticipants { found: usize },
    #[error("roster contains duplicate participant {0}")]
    InvalidRoster(ParticipantId),
    #[error("draw produced an invalid assignment set: {0}")]
    InternalInvariantViolation(&'static str),
}

/// Runs a draw over `roster` using an entropy-seeded generator.
pub fn generate(roster: &[ParticipantId]) -> Result<Vec<Assignment>, DrawError> {
    generate_with_rng(roster, &mut thread_rng())
}

/// Runs a draw over `roster` with caller-supplied randomness.
///
/// All randomness flows through `rng`, so a seeded generator yields a
/// repeatable draw and a degenerate one can force the fallback path.
/// Returns one [`Assignment`] per roster entry; the set covers every
/// participant exactly once as giver and once as receiver, with no
/// self-pairs.
pub fn generate_with_rng<R: Rng>(
    roster: &[ParticipantId],
    rng: &mut R,
) -> Result<Vec<Assignment>, DrawError> {
    if roster.len() < MIN_PARTICIPANTS {
        return Err(DrawError::InsufficientParticipants {
            found: roster.len(),
        });
    }

    let mut seen = HashSet::with_capacity(roster.len());
    for id in roster {
        if !seen.insert(id) {
            return Err(DrawError::InvalidRoster(id.clone()));
        }
    }

    let assignments = match greedy_draw(roster, rng) {
        Some(assignments) => assignments,
        // Greedy phase cornered itself (last pool entry equals the last
        // giver). Discard all partial work and rebuild from scratch.
        None => cyclic_draw(roster, rng),
    };

    validate(roster, &assignments)?;
    Ok(assignments)
}

/// Greedy phase: each giver draws uniformly from the remaining receiver
/// pool, retrying on self-picks up to the attempt budget. Returns `None`
/// when the budget runs out.
fn greedy_draw<R: Rng>(roster: &[ParticipantId], rng: &mut R) -> Option<Vec<Assignment>> {
    let mut pool: Vec<&ParticipantId> = roster.iter().collect();
    let mut assignments = Vec::with_capacity(roster.len());

    for giver in roster {
        let mut picked = None;
        for _ in 0..MAX_PICK_ATTEMPTS {
            let idx = rng.gen_range(0..pool.len());
            if pool[idx] != giver {
                picked = Some(idx);
                break;
            }
        }
        let idx = picked?;
        assignments.push(Assignment {
            giver: giver.clone(),
            receiver: pool.swap_remove(idx).clone(),
        });
    }

    Some(assignments)
}

/// Fallback: shuffle the roster and have each position give to the next,
/// cyclically. A shift by one over distinct elements has no fixed point for
/// n >= 2, so this always yields a valid derangement.
fn cyclic_draw<R: Rng>(roster: &[ParticipantId], rng: &mut R) -> Vec<Assignment> {
    let mut shuffled: Vec<&ParticipantId> = roster.iter().collect();
    shuffled.shuffle(rng);

    let n = shuffled.len();
    let mut receivers: Vec<usize> = (0..n).map(|i| (i + 1) % n).collect();
    for i in 0..n {
        // Unreachable for n >= 2; kept as a guard ahead of validate().
        if receivers[i] == i {
            receivers.swap(i, (i + 2) % n);
        }
    }

    (0..n)
        .map(|i| Assignment {
            giver: shuffled[i].clone(),
            receiver: shuffled[receivers[i]].clone(),
        })
        .collect()
}

/// Checks the full candidate set against the draw invariants. A failure
/// here is an algorithm bug, not bad input: size must match the roster, no
/// pair may be a self-gift, and givers and receivers must each cover the
/// roster exactly.
fn validate(roster: &[ParticipantId], assignments: &[Assignment]) -> Result<(), DrawError> {
    if assignments.len() != roster.len() {
        return Err(DrawError::InternalInvariantViolation(
            "assignment count does not match roster size",
        ));
    }

    if assignments.iter().any(|a| a.giver == a.receiver) {
        return Err(DrawError::InternalInvariantViolation(
            "participant assigned to themselves",
        ));
    }

    let roster_set: HashSet<&ParticipantId> = roster.iter().collect();
    let givers: HashSet<&ParticipantId> = assignments.iter().map(|a| &a.giver).collect();
    let receivers: HashSet<&ParticipantId> = assignments.iter().map(|a| &a.receiver).collect();

    if givers.len() != assignments.len() || givers != roster_set {
        return Err(DrawError::InternalInvariantViolation(
            "givers do not cover the roster exactly once",
        ));
    }

    if receivers.len() != assignments.len() || receivers != roster_set {
        return Err(DrawError::InternalInvariantViolation(
            "receivers do not cover the roster exactly once",
        ));
    }

    Ok(())
}
