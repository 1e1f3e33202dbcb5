//! Query construction.
//!
//! The factory turns patterns and atom lists into resolvable queries,
//! validating them against the schema and applying type inference when
//! the configuration enables it. It is a small `Copy` value: toggling a
//! setting returns a new factory and never affects queries already built.

use std::collections::BTreeSet;

use crate::answer::ConceptMap;
use crate::atom::Atomic;
use crate::config::ResolutionConfig;
use crate::context::ReasoningContext;
use crate::error::{QueryError, ReasonerResult};
use crate::pattern::{Pattern, Variable, VariableGenerator};

use super::{
    AtomicQuery, CompositeQuery, ConjunctiveQuery, DisjunctiveQuery, ResolvableQuery, infer,
};

#[derive(Debug, Clone, Copy)]
pub struct QueryFactory<'a> {
    ctx: &'a ReasoningContext<'a>,
    config: ResolutionConfig,
}

impl<'a> QueryFactory<'a> {
    pub fn new(ctx: &'a ReasoningContext<'a>) -> Self {
        Self::with_config(ctx, ResolutionConfig::default())
    }

    pub fn with_config(ctx: &'a ReasoningContext<'a>, config: ResolutionConfig) -> Self {
        Self { ctx, config }
    }

    pub fn context(&self) -> &'a ReasoningContext<'a> {
        self.ctx
    }

    pub fn config(&self) -> ResolutionConfig {
        self.config
    }

    pub fn enable_infer_types(self) -> Self {
        Self {
            config: self.config.with_infer_types(true),
            ..self
        }
    }

    pub fn disable_infer_types(self) -> Self {
        Self {
            config: self.config.with_infer_types(false),
            ..self
        }
    }

    pub fn with_explain(self, explain: bool) -> Self {
        Self {
            config: self.config.with_explain(explain),
            ..self
        }
    }

    // -----------------------------------------------------------------------
    // Patterns
    // -----------------------------------------------------------------------

    /// Build the query for any pattern: conjunctions, negations and
    /// disjunctions at any nesting.
    pub fn resolvable(&self, pattern: &Pattern) -> ReasonerResult<ResolvableQuery<'a>> {
        let mut generator = VariableGenerator::avoiding(pattern);
        self.resolvable_in(pattern, &mut generator)
    }

    /// Build a disjunction from explicit branches over the given outer
    /// variables. A single branch collapses into its own query.
    pub fn resolvable_disjunction(
        &self,
        branches: &[Pattern],
        outer: BTreeSet<Variable>,
    ) -> ReasonerResult<ResolvableQuery<'a>> {
        let whole = Pattern::Disjunction(branches.to_vec());
        let mut generator = VariableGenerator::avoiding(&whole);
        let mut queries = Vec::with_capacity(branches.len());
        for branch in branches {
            queries.push(self.resolvable_in(branch, &mut generator)?);
        }
        Ok(self.union(queries, outer))
    }

    /// Like [`QueryFactory::resolvable`] with type inference disabled.
    pub fn without_type_inference(&self, pattern: &Pattern) -> ReasonerResult<ResolvableQuery<'a>> {
        self.disable_infer_types().resolvable(pattern)
    }

    /// Build a composite query from a pattern without disjunctions.
    pub fn composite(&self, pattern: &Pattern) -> ReasonerResult<CompositeQuery<'a>> {
        let mut branches = pattern.dnf();
        if branches.len() != 1 {
            return Err(malformed(format!(
                "composite query cannot contain a disjunction: {pattern}"
            )));
        }
        let leaves = branches.remove(0);
        let mut generator = VariableGenerator::avoiding(pattern);
        self.composite_from_leaves(&leaves, &mut generator)
    }

    /// Assemble a composite from separately built parts.
    ///
    /// Every part is rebuilt under this factory's configuration, so parts
    /// made by differently configured factories end up consistent.
    pub fn composite_from_parts(
        &self,
        positive: &ConjunctiveQuery<'a>,
        negated: &[ResolvableQuery<'a>],
    ) -> ReasonerResult<CompositeQuery<'a>> {
        let positive = self.conjunction(positive.atomics().to_vec())?;
        let negated = negated
            .iter()
            .map(|q| self.rebuild(q))
            .collect::<ReasonerResult<Vec<_>>>()?;
        Ok(CompositeQuery::from_parts(positive, negated))
    }

    /// Build a conjunctive (or atomic) query from a pattern of statements.
    pub fn create(&self, pattern: &Pattern) -> ReasonerResult<ResolvableQuery<'a>> {
        let composite = self.composite(pattern)?;
        if !composite.is_positive() {
            return Err(malformed(format!(
                "conjunctive query cannot contain a negation: {pattern}"
            )));
        }
        Ok(composite.downgrade())
    }

    /// Build an atomic query; the pattern must have one selectable statement.
    pub fn atomic(&self, pattern: &Pattern) -> ReasonerResult<AtomicQuery<'a>> {
        match self.create(pattern)? {
            ResolvableQuery::Atomic(q) => Ok(q),
            _ => Err(malformed(format!("not an atomic query: {pattern}"))),
        }
    }

    // -----------------------------------------------------------------------
    // Atoms
    // -----------------------------------------------------------------------

    pub fn create_from_atoms(&self, atomics: Vec<Atomic>) -> ReasonerResult<ResolvableQuery<'a>> {
        Ok(self.conjunction(atomics)?.downgrade())
    }

    /// Build a query from atomic queries, each carrying its own predicates.
    ///
    /// One atom stays atomic; several are joined into a conjunction whose
    /// atoms share variables by name.
    pub fn create_from_atom_list(&self, atoms: &[AtomicQuery<'a>]) -> ReasonerResult<ResolvableQuery<'a>> {
        match atoms {
            [single] => Ok(self.atomic_from_atoms(single.atomics().to_vec())?.into()),
            _ => {
                let atomics = atoms.iter().flat_map(|a| a.atomics().iter().cloned()).collect();
                Ok(self.conjunction(atomics)?.into())
            }
        }
    }

    pub fn atomic_from_atom(&self, atom: Atomic) -> ReasonerResult<AtomicQuery<'a>> {
        self.atomic_from_atoms(vec![atom])
    }

    pub fn atomic_from_atoms(&self, atomics: Vec<Atomic>) -> ReasonerResult<AtomicQuery<'a>> {
        let atomics = self.prepare(atomics);
        self.validate(&atomics)?;
        let selectable = atomics.iter().filter(|a| a.is_selectable()).count();
        if selectable != 1 {
            return Err(malformed(format!(
                "atomic query needs exactly one selectable atom, found {selectable}"
            )));
        }
        Ok(AtomicQuery::from_parts(*self, atomics))
    }

    // -----------------------------------------------------------------------
    // Substitutions
    // -----------------------------------------------------------------------

    pub fn create_with_substitution(
        &self,
        query: &ResolvableQuery<'a>,
        substitution: &ConceptMap,
    ) -> ResolvableQuery<'a> {
        query.with_substitution(substitution)
    }

    pub fn atomic_with_substitution(
        &self,
        query: &AtomicQuery<'a>,
        substitution: &ConceptMap,
    ) -> AtomicQuery<'a> {
        query.with_substitution(substitution)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn resolvable_in(
        &self,
        pattern: &Pattern,
        generator: &mut VariableGenerator,
    ) -> ReasonerResult<ResolvableQuery<'a>> {
        let branches = pattern.dnf();
        if branches.len() == 1 {
            return Ok(self.composite_from_leaves(&branches[0], generator)?.downgrade());
        }
        let outer = common_named_variables(&branches);
        let mut queries = Vec::with_capacity(branches.len());
        for leaves in &branches {
            queries.push(self.composite_from_leaves(leaves, generator)?.downgrade());
        }
        Ok(self.union(queries, outer))
    }

    /// The same query, prepared and validated under this factory.
    fn rebuild(&self, query: &ResolvableQuery<'a>) -> ReasonerResult<ResolvableQuery<'a>> {
        Ok(match query {
            ResolvableQuery::Atomic(q) => self.atomic_from_atoms(q.atomics().to_vec())?.into(),
            ResolvableQuery::Conjunctive(q) => self.conjunction(q.atomics().to_vec())?.into(),
            ResolvableQuery::Composite(q) => self.composite_from_parts(q.positive(), q.negated())?.into(),
            ResolvableQuery::Disjunctive(q) => {
                let branches = q
                    .branches()
                    .iter()
                    .map(|b| self.rebuild(b))
                    .collect::<ReasonerResult<Vec<_>>>()?;
                self.union(branches, q.outer_variables().clone())
            }
        })
    }

    fn union(&self, mut queries: Vec<ResolvableQuery<'a>>, outer: BTreeSet<Variable>) -> ResolvableQuery<'a> {
        if queries.len() == 1 {
            return queries.remove(0);
        }
        DisjunctiveQuery::from_parts(*self, queries, outer).into()
    }

    fn composite_from_leaves(
        &self,
        leaves: &[Pattern],
        generator: &mut VariableGenerator,
    ) -> ReasonerResult<CompositeQuery<'a>> {
        let mut atomics = Vec::new();
        let mut negated = Vec::new();
        for leaf in leaves {
            match leaf {
                Pattern::Statement(s) => atomics.extend(Atomic::from_statement(s, generator)),
                Pattern::Negation(inner) => negated.push(self.resolvable_in(inner, generator)?),
                other => return Err(malformed(format!("unexpected pattern in conjunction: {other}"))),
            }
        }
        let positive = self.conjunction(atomics)?;
        Ok(CompositeQuery::from_parts(positive, negated))
    }

    fn conjunction(&self, atomics: Vec<Atomic>) -> ReasonerResult<ConjunctiveQuery<'a>> {
        let atomics = self.prepare(atomics);
        self.validate(&atomics)?;
        Ok(ConjunctiveQuery::from_parts(*self, atomics))
    }

    fn prepare(&self, atomics: Vec<Atomic>) -> Vec<Atomic> {
        if self.config.infer_types {
            infer::infer_types(&atomics, self.ctx.concepts())
        } else {
            atomics
        }
    }

    fn validate(&self, atomics: &[Atomic]) -> ReasonerResult<()> {
        let concepts = self.ctx.concepts();
        let mut bound = BTreeSet::new();
        for atomic in atomics.iter().filter(|a| a.is_selectable()) {
            bound.extend(atomic.variables());
            let mut labels: Vec<&crate::concept::Label> = atomic.label().into_iter().collect();
            if let Atomic::Relation(r) = atomic {
                labels.extend(r.role_players.iter().filter_map(|rp| rp.role.as_ref()));
            }
            if let Some(unknown) = labels.into_iter().find(|l| !concepts.is_known(l)) {
                return Err(QueryError::UnknownLabel {
                    label: unknown.to_string(),
                }
                .into());
            }
        }
        if bound.is_empty() {
            return Err(malformed(format!(
                "query has no selectable atom: {}",
                crate::atom::display_atomics(atomics)
            )));
        }
        for predicate in atomics.iter().filter(|a| a.is_predicate()) {
            if let Some(var) = predicate.variables().into_iter().find(|v| !bound.contains(v)) {
                return Err(malformed(format!(
                    "variable {var} in `{predicate}` is not bound by any atom"
                )));
            }
        }
        Ok(())
    }
}

/// Named variables every branch mentions outside its negations.
fn common_named_variables(branches: &[Vec<Pattern>]) -> BTreeSet<Variable> {
    let mut per_branch = branches
        .iter()
        .map(|leaves| Pattern::Conjunction(leaves.clone()).named_variables());
    let Some(first) = per_branch.next() else {
        return BTreeSet::new();
    };
    per_branch.fold(first, |acc, vars| acc.intersection(&vars).cloned().collect())
}

fn malformed(message: String) -> crate::error::ReasonerError {
    QueryError::Malformed { message }.into()
}
