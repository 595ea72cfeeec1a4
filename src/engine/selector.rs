// src/engine/selector.rs

//! Weighted question selection.
//!
//! Fresh questions are drawn from an expanded pool in which every question
//! appears once per point of its chapter's share (scaled by `WEIGHT_SCALE`).
//! Whatever the draw leaves short is backfilled chapter by chapter in weight
//! order, first from fresh and then from recycled questions.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::WEIGHT_SCALE;
use crate::error::AppError;
use crate::models::{
    question::{Candidate, QuestionId},
    syllabus::{ChapterId, ChapterWeights},
};

/// Candidates of one scope, split by whether the student has seen them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePool {
    pub fresh: Vec<Candidate>,
    pub recycled: Vec<Candidate>,
}

impl CandidatePool {
    /// Drops questions already `chosen` in this generation run, then separates
    /// previously `used` questions from fresh ones.
    pub fn partition(
        candidates: Vec<Candidate>,
        used: &HashSet<QuestionId>,
        chosen: &HashSet<QuestionId>,
    ) -> Self {
        let (recycled, fresh): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .filter(|c| !chosen.contains(&c.question_id))
            .partition(|c| used.contains(&c.question_id));

        Self { fresh, recycled }
    }

    pub fn is_empty(&self) -> bool {
        self.fresh.is_empty() && self.recycled.is_empty()
    }
}

fn chapters_of(candidates: &[Candidate]) -> BTreeSet<ChapterId> {
    candidates.iter().map(|c| c.chapter_id).collect()
}

/// Picks exactly `target` distinct question ids from `pool`.
pub fn select<R: Rng + ?Sized>(
    pool: &CandidatePool,
    weights: &ChapterWeights,
    target: usize,
    rng: &mut R,
) -> Result<Vec<QuestionId>, AppError> {
    if target == 0 {
        return Ok(Vec::new());
    }
    if pool.is_empty() {
        return Err(AppError::InsufficientQuestions(
            "No active questions in scope".to_string(),
        ));
    }

    let mut picked: Vec<QuestionId> = Vec::with_capacity(target);
    let mut seen: HashSet<QuestionId> = HashSet::with_capacity(target);

    // Weighted draw over fresh questions.
    let shares = weights.normalized_over(&chapters_of(&pool.fresh));
    let mut expanded: Vec<QuestionId> = Vec::new();
    for candidate in &pool.fresh {
        let share = shares.get(&candidate.chapter_id).copied().unwrap_or(0.0);
        let copies = (share * WEIGHT_SCALE).round() as usize;
        expanded.extend(std::iter::repeat_n(candidate.question_id, copies));
    }
    expanded.shuffle(rng);

    for id in expanded {
        if picked.len() == target {
            break;
        }
        if seen.insert(id) {
            picked.push(id);
        }
    }

    // Backfill by chapter priority: fresh first, then recycled.
    for group in [&pool.fresh, &pool.recycled] {
        if picked.len() == target {
            break;
        }

        let mut by_chapter: BTreeMap<ChapterId, Vec<QuestionId>> = BTreeMap::new();
        for candidate in group.iter().filter(|c| !seen.contains(&c.question_id)) {
            by_chapter
                .entry(candidate.chapter_id)
                .or_default()
                .push(candidate.question_id);
        }

        let order = weights.priority_order(&by_chapter.keys().copied().collect());
        'chapters: for chapter_id in order {
            let Some(ids) = by_chapter.get_mut(&chapter_id) else {
                continue;
            };
            ids.shuffle(rng);
            for id in ids.iter() {
                if picked.len() == target {
                    break 'chapters;
                }
                if seen.insert(*id) {
                    picked.push(*id);
                }
            }
        }
    }

    if picked.len() < target {
        return Err(AppError::InsufficientQuestions(format!(
            "Requested {} questions but only {} are available",
            target,
            picked.len()
        )));
    }

    Ok(picked)
}
