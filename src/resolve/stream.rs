//! Lazy answer streams over atomic goals.
//!
//! Each query shape has a cursor: atomic goals read their tabled answers,
//! conjunctions join atomic goals depth-first in plan order, composites
//! filter by negation-as-failure, and disjunctions union their branches.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::answer::ConceptMap;
use crate::atom::Atomic;
use crate::error::{QueryError, ReasonerResult};
use crate::explanation::Explanation;
use crate::pattern::Variable;
use crate::query::{AtomicQuery, CompositeQuery, ResolvableQuery};

use super::Resolution;

pub(crate) enum Cursor<'a> {
    Atomic {
        query: AtomicQuery<'a>,
        answers: Option<std::vec::IntoIter<ConceptMap>>,
    },
    Join(JoinCursor<'a>),
    Negation {
        positive: Box<Cursor<'a>>,
        query: CompositeQuery<'a>,
    },
    Union {
        branches: Vec<Cursor<'a>>,
        current: usize,
        outer: BTreeSet<Variable>,
        seen: HashSet<ConceptMap>,
    },
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(query: &ResolvableQuery<'a>) -> Self {
        match query {
            ResolvableQuery::Atomic(q) => Cursor::Atomic {
                query: q.clone(),
                answers: None,
            },
            ResolvableQuery::Conjunctive(q) => Cursor::Join(JoinCursor {
                steps: q.steps(),
                levels: Vec::new(),
                path: Vec::new(),
                started: false,
            }),
            ResolvableQuery::Composite(q) => Cursor::Negation {
                positive: Box::new(Cursor::new(&q.positive().downgrade())),
                query: q.clone(),
            },
            ResolvableQuery::Disjunctive(q) => Cursor::Union {
                branches: q.branches().iter().map(Cursor::new).collect(),
                current: 0,
                outer: q.outer_variables().clone(),
                seen: HashSet::new(),
            },
        }
    }

    pub(crate) fn next_answer(&mut self, res: &mut Resolution<'a>) -> ReasonerResult<Option<ConceptMap>> {
        match self {
            Cursor::Atomic { query, answers } => {
                if answers.is_none() {
                    *answers = Some(res.resolve_atomic(query)?.into_iter());
                }
                Ok(answers.as_mut().and_then(Iterator::next))
            }
            Cursor::Join(join) => join.next_answer(res),
            Cursor::Negation { positive, query } => loop {
                let Some(answer) = positive.next_answer(res)? else {
                    return Ok(None);
                };
                if !excluded(query, &answer, res)? {
                    return Ok(Some(answer));
                }
            },
            Cursor::Union {
                branches,
                current,
                outer,
                seen,
            } => {
                while let Some(branch) = branches.get_mut(*current) {
                    match branch.next_answer(res)? {
                        Some(answer) => {
                            let answer = answer.project(outer);
                            if seen.insert(answer.clone()) {
                                return Ok(Some(answer));
                            }
                        }
                        None => *current += 1,
                    }
                }
                Ok(None)
            }
        }
    }
}

/// Whether some negated block of `query` has an answer under `answer`.
fn excluded<'a>(
    query: &CompositeQuery<'a>,
    answer: &ConceptMap,
    res: &mut Resolution<'a>,
) -> ReasonerResult<bool> {
    for (index, block) in query.negated().iter().enumerate() {
        let shared = query.shared_variables(index);
        if let Some(var) = shared.iter().find(|v| !answer.contains(v)) {
            return Err(QueryError::UngroundedNegation {
                variable: var.to_string(),
            }
            .into());
        }
        let binding = answer.project(&shared).without_explanation();
        let mut cursor = Cursor::new(&block.with_substitution(&binding));
        if cursor.next_answer(res)?.is_some() {
            tracing::trace!(answer = %answer, block = %block, "answer excluded by negation");
            return Ok(true);
        }
    }
    Ok(false)
}

struct Level {
    answers: std::vec::IntoIter<ConceptMap>,
    base: ConceptMap,
}

/// Depth-first join over plan steps.
pub(crate) struct JoinCursor<'a> {
    steps: Vec<(AtomicQuery<'a>, Vec<Atomic>)>,
    levels: Vec<Level>,
    /// Answer chosen at each level, for join explanations.
    path: Vec<ConceptMap>,
    started: bool,
}

impl<'a> JoinCursor<'a> {
    fn next_answer(&mut self, res: &mut Resolution<'a>) -> ReasonerResult<Option<ConceptMap>> {
        if !self.started {
            self.started = true;
            let Some((first, _)) = self.steps.first() else {
                return Ok(None);
            };
            let answers = res.resolve_atomic(first)?;
            self.levels.push(Level {
                answers: answers.into_iter(),
                base: ConceptMap::new(),
            });
        }
        loop {
            let depth = self.levels.len();
            let Some(level) = self.levels.last_mut() else {
                return Ok(None);
            };
            let Some(answer) = level.answers.next() else {
                self.levels.pop();
                continue;
            };
            let Some(merged) = level.base.merge(&answer) else {
                continue;
            };
            let step = depth - 1;
            let concepts = res.ctx.concepts();
            if !self.steps[step].1.iter().all(|f| f.holds(&merged, concepts) == Some(true)) {
                continue;
            }
            self.path.truncate(step);
            self.path.push(answer);

            if step + 1 == self.steps.len() {
                if res.explain() {
                    let explanation = Arc::new(Explanation::join(self.path.clone()));
                    return Ok(Some(merged.with_explanation(explanation)));
                }
                return Ok(Some(merged));
            }
            let next = self.steps[step + 1].0.with_substitution(&merged);
            let answers = res.resolve_atomic(&next)?;
            self.levels.push(Level {
                answers: answers.into_iter(),
                base: merged,
            });
        }
    }
}

/// Answers of a query, pulled lazily.
///
/// Answers are projected onto the query's answer variables and
/// deduplicated. A failed pull yields one error and ends the stream; the
/// partial cache state of the failed resolution is discarded.
pub struct AnswerStream<'a> {
    query: ResolvableQuery<'a>,
    substitution: ConceptMap,
    explain: bool,
    projection: BTreeSet<Variable>,
    cursor: Option<Cursor<'a>>,
    seen: HashSet<ConceptMap>,
    done: bool,
}

impl<'a> AnswerStream<'a> {
    pub(crate) fn new(query: ResolvableQuery<'a>, substitution: ConceptMap, explain: bool) -> Self {
        let projection = query.answer_variables();
        Self {
            query,
            substitution,
            explain,
            projection,
            cursor: None,
            seen: HashSet::new(),
            done: false,
        }
    }

    pub fn query(&self) -> &ResolvableQuery<'a> {
        &self.query
    }

    /// Start over from the first answer. Finished goals are served from the
    /// query cache.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.seen.clear();
        self.done = false;
    }
}

impl Iterator for AnswerStream<'_> {
    type Item = ReasonerResult<ConceptMap>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let cursor = self
            .cursor
            .get_or_insert_with(|| Cursor::new(&self.query.with_substitution(&self.substitution)));
        let mut resolution = Resolution::new(self.query.factory(), self.explain);
        loop {
            match cursor.next_answer(&mut resolution) {
                Ok(Some(answer)) => {
                    let answer = answer.project(&self.projection);
                    if self.seen.insert(answer.clone()) {
                        return Some(Ok(answer));
                    }
                }
                Ok(None) => {
                    tracing::info!(query = %self.query, answers = self.seen.len(), "query resolved");
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    tracing::warn!(query = %self.query, error = %e, "resolution failed");
                    resolution.abort();
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
