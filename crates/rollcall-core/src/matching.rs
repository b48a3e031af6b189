//! Nearest-signature matching with the engine's same-person decision.

use crate::engine::FaceEngine;
use crate::types::Signature;

/// Outcome of comparing one probe against every enrolled signature.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Index of the nearest enrolled signature, `None` for an empty gallery.
    pub nearest: Option<usize>,
    /// Distance to the nearest signature (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Same-person flag taken at the nearest index.
    pub accepted: bool,
}

impl MatchOutcome {
    /// The nearest index, only if it was accepted.
    pub fn accepted_index(&self) -> Option<usize> {
        self.nearest.filter(|_| self.accepted)
    }
}

/// Compare `probe` against `known`.
///
/// Distances and same-person flags are computed for every entry; the result
/// is the argmin entry, accepted iff its own flag is set. Ties keep the
/// earliest entry.
pub fn match_signature<E>(engine: &E, known: &[Signature], probe: &Signature) -> MatchOutcome
where
    E: FaceEngine + ?Sized,
{
    let distances: Vec<f32> = known.iter().map(|k| engine.distance(k, probe)).collect();
    let flags: Vec<bool> = distances.iter().map(|&d| engine.same_person(d)).collect();

    let nearest = distances
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ if d.is_nan() => best,
            _ => Some((i, d)),
        });

    match nearest {
        Some((index, distance)) => MatchOutcome {
            nearest: Some(index),
            distance,
            accepted: flags[index],
        },
        None => MatchOutcome {
            nearest: None,
            distance: f32::INFINITY,
            accepted: false,
        },
    }
}
